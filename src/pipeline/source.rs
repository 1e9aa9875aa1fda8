//! Forward-only candidate stream with a prefetch window
//!
//! Pages are fetched by identifier keyset, so the stream holds no server
//! cursor between round trips and writes may run on the same connection.

use std::collections::VecDeque;

use crate::database::{DatabaseBackend, DatabaseResult, SourceQuery};
use crate::models::CandidateRecord;

/// Lazily fetched candidate records in identifier order.
///
/// Reopening means constructing a new source; a source is never rewound.
#[derive(Debug)]
pub struct RecordSource {
    query: SourceQuery,
    prefetch_window: usize,
    buffer: VecDeque<CandidateRecord>,
    last_id: Option<String>,
    exhausted: bool,
    round_trips: u64,
}

impl RecordSource {
    /// Open a stream over `query`, buffering at most `prefetch_window` rows ahead.
    pub fn open(query: SourceQuery, prefetch_window: usize) -> Self {
        let prefetch_window = prefetch_window.max(1);
        Self {
            query,
            prefetch_window,
            buffer: VecDeque::with_capacity(prefetch_window),
            last_id: None,
            exhausted: false,
            round_trips: 0,
        }
    }

    /// Round trips made so far.
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Records fetched but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next record, or `None` once the source is exhausted.
    pub fn next_record<B>(&mut self, store: &mut B) -> DatabaseResult<Option<CandidateRecord>>
    where
        B: DatabaseBackend + ?Sized,
    {
        if self.buffer.is_empty() {
            self.refill(store)?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Up to `size` records; only the last chunk may be shorter and an
    /// empty chunk means the source is exhausted.
    pub fn next_chunk<B>(&mut self, store: &mut B, size: usize) -> DatabaseResult<Vec<CandidateRecord>>
    where
        B: DatabaseBackend + ?Sized,
    {
        let size = size.max(1);
        let mut chunk = Vec::with_capacity(size);
        while chunk.len() < size {
            if self.buffer.is_empty() {
                self.refill(store)?;
                if self.buffer.is_empty() {
                    break;
                }
            }
            let take = (size - chunk.len()).min(self.buffer.len());
            chunk.extend(self.buffer.drain(..take));
        }
        Ok(chunk)
    }

    fn refill<B>(&mut self, store: &mut B) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        if self.exhausted {
            return Ok(());
        }

        let page =
            store.fetch_candidates(&self.query, self.last_id.as_deref(), self.prefetch_window)?;
        self.round_trips += 1;

        if page.len() < self.prefetch_window {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.last_id = Some(last.id.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseError, FaultPlan, MemoryBackend};
    use rust_decimal::Decimal;

    fn store_with(count: usize) -> MemoryBackend {
        let mut store = MemoryBackend::new();
        store.initialize("customer", "bonus_coupon").unwrap();
        let records: Vec<_> = (0..count)
            .map(|i| {
                CandidateRecord::new(
                    format!("C{:03}", i),
                    format!("c{}@example.com", i),
                    Decimal::from(i as i64 * 100),
                )
            })
            .collect();
        store.load_candidates("customer", &records).unwrap();
        store
    }

    #[test]
    fn test_row_mode_reads_in_order() {
        let mut store = store_with(5);
        let mut source = RecordSource::open(SourceQuery::unfiltered("customer"), 2);

        let mut ids = Vec::new();
        while let Some(record) = source.next_record(&mut store).unwrap() {
            ids.push(record.id);
            assert!(source.buffered() < 2);
        }
        assert_eq!(ids, vec!["C000", "C001", "C002", "C003", "C004"]);
        // 2 + 2 + 1, the short page marks exhaustion
        assert_eq!(source.round_trips(), 3);
        assert!(source.next_record(&mut store).unwrap().is_none());
        assert_eq!(source.round_trips(), 3);
    }

    #[test]
    fn test_exact_multiple_needs_one_empty_page() {
        let mut store = store_with(4);
        let mut source = RecordSource::open(SourceQuery::unfiltered("customer"), 2);
        let mut count = 0;
        while source.next_record(&mut store).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(source.round_trips(), 3);
    }

    #[test]
    fn test_chunk_mode_crosses_page_boundaries() {
        let mut store = store_with(7);
        let mut source = RecordSource::open(SourceQuery::unfiltered("customer"), 2);

        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let chunk = source.next_chunk(&mut store, 3).unwrap();
            (!chunk.is_empty()).then_some(chunk.len())
        })
        .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_empty_source_is_not_an_error() {
        let mut store = MemoryBackend::new();
        store.initialize("customer", "bonus_coupon").unwrap();
        let mut source = RecordSource::open(SourceQuery::unfiltered("customer"), 10);
        assert!(source.next_record(&mut store).unwrap().is_none());
        assert!(source.next_chunk(&mut store, 10).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_failure_surfaces() {
        let mut store = MemoryBackend::with_faults(FaultPlan {
            fail_fetch_at: Some(2),
            ..FaultPlan::default()
        });
        store.initialize("customer", "bonus_coupon").unwrap();
        let records = vec![
            CandidateRecord::new("C1", "a@example.com", Decimal::from(1)),
            CandidateRecord::new("C2", "b@example.com", Decimal::from(2)),
        ];
        store.load_candidates("customer", &records).unwrap();

        let mut source = RecordSource::open(SourceQuery::unfiltered("customer"), 1);
        assert!(source.next_record(&mut store).unwrap().is_some());
        let err = source.next_record(&mut store).unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionFailed(_)));
    }
}
