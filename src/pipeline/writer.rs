//! Write strategies
//!
//! Four interchangeable ways to submit classified rows. Each produces the
//! same sink contents; they differ in statements per row and in what a
//! failure takes down with it.

use tracing::error;

use crate::classify::ClassificationRule;
use crate::database::{
    DatabaseBackend, DatabaseError, DatabaseResult, SelectionPredicate, SinkTarget,
};
use crate::models::{OutputRecord, WriteMode};

/// Result of submitting one array-bound batch.
///
/// Fatal failures are returned as `Err` by [`WriteStrategy::write_batch`]
/// instead.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Rows the store applied
    pub accepted: Vec<OutputRecord>,
    /// Rows the store rejected
    pub rejected: usize,
    /// The rejection, when any row failed
    pub error: Option<DatabaseError>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// How output rows are submitted to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// One literal statement per row, nothing reused
    PerRow,
    /// One prepared statement, re-bound and executed per row
    ReusedStatement,
    /// Rows grouped into multi-row statements of at most `batch_size`
    ArrayBatch { batch_size: usize },
    /// Read, classify and insert as one statement inside the store
    ServerResident,
}

impl WriteStrategy {
    /// Strategy for a configured mode.
    pub fn from_mode(mode: WriteMode, batch_size: usize) -> Self {
        match mode {
            WriteMode::PerRow => WriteStrategy::PerRow,
            WriteMode::ReusedStatement => WriteStrategy::ReusedStatement,
            WriteMode::ArrayBatch => WriteStrategy::ArrayBatch {
                batch_size: batch_size.max(1),
            },
            WriteMode::ServerResident => WriteStrategy::ServerResident,
        }
    }

    pub fn mode(&self) -> WriteMode {
        match self {
            WriteStrategy::PerRow => WriteMode::PerRow,
            WriteStrategy::ReusedStatement => WriteMode::ReusedStatement,
            WriteStrategy::ArrayBatch { .. } => WriteMode::ArrayBatch,
            WriteStrategy::ServerResident => WriteMode::ServerResident,
        }
    }

    /// Rows per statement; 1 for the row-wise strategies.
    pub fn batch_size(&self) -> usize {
        match self {
            WriteStrategy::ArrayBatch { batch_size } => *batch_size,
            _ => 1,
        }
    }

    /// Acquire what the strategy holds for the run.
    ///
    /// Every successful `open` must be paired with [`WriteStrategy::close`].
    pub fn open<B>(&self, store: &mut B, sink: &SinkTarget) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        match self {
            WriteStrategy::ReusedStatement => store.prepare_insert(sink),
            _ => Ok(()),
        }
    }

    /// Release what `open` acquired. Failures are logged, not returned, so
    /// that release never masks the error that ended the run.
    pub fn close<B>(&self, store: &mut B)
    where
        B: DatabaseBackend + ?Sized,
    {
        if let WriteStrategy::ReusedStatement = self
            && let Err(e) = store.release_insert()
        {
            error!(error = %e, "Failed to release prepared insert");
        }
    }

    /// Submit one row.
    pub fn write_row<B>(
        &self,
        store: &mut B,
        sink: &SinkTarget,
        record: &OutputRecord,
    ) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        match self {
            WriteStrategy::PerRow => store.insert_unprepared(sink, record),
            WriteStrategy::ReusedStatement => store.insert_prepared(record),
            WriteStrategy::ArrayBatch { .. } => store
                .insert_batch(sink, std::slice::from_ref(record))
                .map(|_| ()),
            WriteStrategy::ServerResident => Err(DatabaseError::InvalidInput(
                "server-resident strategy has no row writes".to_string(),
            )),
        }
    }

    /// Submit rows as one array-bound statement.
    ///
    /// Row and batch rejections are folded into the outcome: when the store
    /// names the failed rows the others count as accepted, otherwise the
    /// whole batch is rejected.
    pub fn write_batch<B>(
        &self,
        store: &mut B,
        sink: &SinkTarget,
        records: Vec<OutputRecord>,
    ) -> DatabaseResult<BatchOutcome>
    where
        B: DatabaseBackend + ?Sized,
    {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        match store.insert_batch(sink, &records) {
            Ok(_) => Ok(BatchOutcome {
                accepted: records,
                rejected: 0,
                error: None,
            }),
            Err(DatabaseError::BatchRejected {
                message,
                failed_rows: Some(failed),
            }) => {
                let rejected = failed.len();
                let accepted = records
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !failed.contains(i))
                    .map(|(_, record)| record)
                    .collect();
                Ok(BatchOutcome {
                    accepted,
                    rejected,
                    error: Some(DatabaseError::BatchRejected {
                        message,
                        failed_rows: Some(failed),
                    }),
                })
            }
            Err(e) if !e.is_fatal() => Ok(BatchOutcome {
                accepted: Vec::new(),
                rejected: records.len(),
                error: Some(e),
            }),
            Err(e) => Err(e),
        }
    }

    /// Run the whole job as one set-based statement.
    ///
    /// # Returns
    /// Number of rows inserted
    pub fn write_set<B>(
        &self,
        store: &mut B,
        source_table: &str,
        predicate: &SelectionPredicate,
        sink: &SinkTarget,
        rule: &ClassificationRule,
    ) -> DatabaseResult<u64>
    where
        B: DatabaseBackend + ?Sized,
    {
        match self {
            WriteStrategy::ServerResident => {
                store.insert_classified(source_table, predicate, sink, rule)
            }
            _ => Err(DatabaseError::InvalidInput(format!(
                "{} strategy has no set statement",
                self.mode()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{FaultPlan, MemoryBackend};
    use crate::models::CategoryCode;
    use rust_decimal::Decimal;

    fn output(id: &str) -> OutputRecord {
        OutputRecord {
            period_key: "202506".into(),
            customer_id: id.into(),
            email: format!("{}@example.com", id),
            code: CategoryCode::Aa,
            credit_point: Decimal::from(100),
            dispatched_at: None,
        }
    }

    fn sink() -> SinkTarget {
        SinkTarget::new("bonus_coupon", "202506")
    }

    fn store(faults: FaultPlan) -> MemoryBackend {
        let mut store = MemoryBackend::with_faults(faults);
        store.initialize("customer", "bonus_coupon").unwrap();
        store
    }

    #[test]
    fn test_from_mode_round_trips() {
        for mode in WriteMode::ALL {
            assert_eq!(WriteStrategy::from_mode(mode, 100).mode(), mode);
        }
        assert_eq!(
            WriteStrategy::from_mode(WriteMode::ArrayBatch, 0).batch_size(),
            1
        );
        assert_eq!(WriteStrategy::from_mode(WriteMode::PerRow, 500).batch_size(), 1);
    }

    #[test]
    fn test_reused_statement_pairs_open_and_close() {
        let mut store = store(FaultPlan::default());
        let strategy = WriteStrategy::ReusedStatement;
        strategy.open(&mut store, &sink()).unwrap();
        assert!(store.has_prepared_insert());
        strategy.write_row(&mut store, &sink(), &output("C1")).unwrap();
        strategy.close(&mut store);
        assert!(!store.has_prepared_insert());
        assert_eq!(store.committed_rows("bonus_coupon").len(), 1);
    }

    #[test]
    fn test_per_row_holds_nothing() {
        let mut store = store(FaultPlan::default());
        let strategy = WriteStrategy::PerRow;
        strategy.open(&mut store, &sink()).unwrap();
        assert!(!store.has_prepared_insert());
        strategy.write_row(&mut store, &sink(), &output("C1")).unwrap();
        strategy.close(&mut store);
        assert_eq!(store.activity().releases, 0);
    }

    #[test]
    fn test_partial_batch_keeps_accepted_rows() {
        let mut store = store(FaultPlan {
            partial_batches: true,
            ..FaultPlan::reject(&["C2"])
        });
        let strategy = WriteStrategy::ArrayBatch { batch_size: 10 };
        let outcome = strategy
            .write_batch(&mut store, &sink(), vec![output("C1"), output("C2"), output("C3")])
            .unwrap();
        assert_eq!(outcome.rejected, 1);
        assert_eq!(
            outcome
                .accepted
                .iter()
                .map(|r| r.customer_id.as_str())
                .collect::<Vec<_>>(),
            vec!["C1", "C3"]
        );
        assert!(!outcome.is_clean());
    }

    #[test]
    fn test_opaque_batch_failure_rejects_all() {
        let mut store = store(FaultPlan::reject(&["C2"]));
        let strategy = WriteStrategy::ArrayBatch { batch_size: 10 };
        let outcome = strategy
            .write_batch(&mut store, &sink(), vec![output("C1"), output("C2")])
            .unwrap();
        assert_eq!(outcome.rejected, 2);
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn test_empty_batch_is_not_submitted() {
        let mut store = store(FaultPlan::default());
        let strategy = WriteStrategy::ArrayBatch { batch_size: 10 };
        let outcome = strategy.write_batch(&mut store, &sink(), Vec::new()).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(store.activity().write_statements, 0);
    }

    #[test]
    fn test_set_statement_only_for_server_resident() {
        let mut store = store(FaultPlan::default());
        let predicate =
            SelectionPredicate::new(chrono::NaiveDate::from_ymd_opt(2013, 1, 1).unwrap());
        let err = WriteStrategy::PerRow
            .write_set(
                &mut store,
                "customer",
                &predicate,
                &sink(),
                &ClassificationRule::default(),
            )
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));

        let inserted = WriteStrategy::ServerResident
            .write_set(
                &mut store,
                "customer",
                &predicate,
                &sink(),
                &ClassificationRule::default(),
            )
            .unwrap();
        assert_eq!(inserted, 0);
    }
}
