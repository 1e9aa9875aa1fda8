//! In-process backend
//!
//! Keeps the candidate and sink tables in memory and applies the same
//! transaction semantics as the SQL backends: writes inside `begin` are
//! buffered until `commit`, writes outside a transaction are applied
//! immediately. A [`FaultPlan`] injects failures for drills and tests.
//!
//! Unlike DuckDB and PostgreSQL, a rejected write does not poison the open
//! transaction, and batch rejections report the offending rows.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;

use super::{
    DatabaseBackend, DatabaseError, DatabaseResult, ResetScope, SelectionPredicate, SinkTarget,
    SourceQuery, check_limit_scale, code_summary,
};
use crate::classify::ClassificationRule;
use crate::models::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};

/// Failures to inject into a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Customer identifiers whose sink writes are rejected
    pub reject_ids: HashSet<String>,
    /// Report only the rejected rows of a batch; otherwise the whole batch fails
    pub partial_batches: bool,
    /// Fail the n-th fetch (1-based) as a lost connection
    pub fail_fetch_at: Option<usize>,
    /// Fail the n-th commit (1-based)
    pub fail_commit_at: Option<usize>,
    /// Fail the n-th write statement (1-based) as a lost connection
    pub fail_write_at: Option<usize>,
    /// Fail the set-based statement
    pub fail_set_statement: bool,
}

impl FaultPlan {
    /// Reject writes for the given identifiers.
    pub fn reject(ids: &[&str]) -> Self {
        Self {
            reject_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Counters describing what the store was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryActivity {
    /// Pages fetched
    pub fetches: usize,
    /// Transactions committed
    pub commits: usize,
    /// Transactions rolled back
    pub rollbacks: usize,
    /// Prepared inserts created
    pub prepares: usize,
    /// Prepared inserts released while one was open
    pub releases: usize,
    /// Write statements executed (successful or not)
    pub write_statements: usize,
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Candidate tables by name
    sources: BTreeMap<String, Vec<CandidateRecord>>,
    /// Committed sink rows by table name
    sinks: BTreeMap<String, Vec<OutputRecord>>,
    /// Uncommitted writes of the open transaction, with their table
    pending: Vec<(String, OutputRecord)>,
    in_transaction: bool,
    prepared: Option<SinkTarget>,
    commit_attempts: usize,
    faults: FaultPlan,
    activity: MemoryActivity,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with injected failures.
    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            faults,
            ..Default::default()
        }
    }

    /// What the store has been asked to do so far.
    pub fn activity(&self) -> MemoryActivity {
        self.activity
    }

    /// Whether a prepared insert is currently open.
    pub fn has_prepared_insert(&self) -> bool {
        self.prepared.is_some()
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Committed rows of a sink table.
    pub fn committed_rows(&self, sink_table: &str) -> &[OutputRecord] {
        self.sinks.get(sink_table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn source(&self, table: &str) -> DatabaseResult<&Vec<CandidateRecord>> {
        self.sources
            .get(table)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("Unknown table: {}", table)))
    }

    fn check_sink(&self, table: &str) -> DatabaseResult<()> {
        if self.sinks.contains_key(table) {
            Ok(())
        } else {
            Err(DatabaseError::QueryFailed(format!("Unknown table: {}", table)))
        }
    }

    fn apply(&mut self, table: &str, record: OutputRecord) {
        if self.in_transaction {
            self.pending.push((table.to_string(), record));
        } else {
            self.sinks.entry(table.to_string()).or_default().push(record);
        }
    }

    /// Count a write statement and fail it if the plan says so.
    fn count_write(&mut self) -> DatabaseResult<()> {
        self.activity.write_statements += 1;
        if self.faults.fail_write_at == Some(self.activity.write_statements) {
            return Err(DatabaseError::ConnectionFailed(
                "injected connection loss during write".to_string(),
            ));
        }
        Ok(())
    }

    fn write_one(&mut self, table: &str, record: &OutputRecord) -> DatabaseResult<()> {
        self.check_sink(table)?;
        self.count_write()?;
        if self.faults.reject_ids.contains(&record.customer_id) {
            return Err(DatabaseError::WriteRejected(format!(
                "injected rejection for {}",
                record.customer_id
            )));
        }
        self.apply(table, record.clone());
        Ok(())
    }

    /// Committed rows plus the open transaction's writes for one period key.
    fn visible_rows<'a>(&'a self, sink: &'a SinkTarget) -> impl Iterator<Item = &'a OutputRecord> {
        let committed = self.committed_rows(&sink.table).iter();
        let pending = self
            .pending
            .iter()
            .filter(|(table, _)| *table == sink.table)
            .map(|(_, record)| record);
        committed
            .chain(pending)
            .filter(|record| record.period_key == sink.period_key)
    }
}

impl DatabaseBackend for MemoryBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn initialize(&mut self, source_table: &str, sink_table: &str) -> DatabaseResult<()> {
        self.sources.entry(source_table.to_string()).or_default();
        self.sinks.entry(sink_table.to_string()).or_default();
        Ok(())
    }

    fn health_check(&mut self) -> DatabaseResult<bool> {
        Ok(true)
    }

    fn load_candidates(
        &mut self,
        source_table: &str,
        records: &[CandidateRecord],
    ) -> DatabaseResult<usize> {
        check_limit_scale(records)?;
        let table = self
            .sources
            .get_mut(source_table)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("Unknown table: {}", source_table)))?;
        table.extend_from_slice(records);
        Ok(records.len())
    }

    fn fetch_candidates(
        &mut self,
        query: &SourceQuery,
        after_id: Option<&str>,
        limit: usize,
    ) -> DatabaseResult<Vec<CandidateRecord>> {
        self.activity.fetches += 1;
        if self.faults.fail_fetch_at == Some(self.activity.fetches) {
            return Err(DatabaseError::ConnectionFailed(
                "injected connection loss during fetch".to_string(),
            ));
        }

        let mut page: Vec<CandidateRecord> = self
            .source(&query.table)?
            .iter()
            .filter(|r| !r.id.is_empty())
            .filter(|r| after_id.is_none_or(|after| r.id.as_str() > after))
            .filter(|r| query.predicate.is_none_or(|p| p.accepts(r)))
            .cloned()
            .collect();
        page.sort_by(|a, b| a.id.cmp(&b.id));
        page.truncate(limit);
        Ok(page)
    }

    fn reset_sink(&mut self, sink: &SinkTarget, scope: ResetScope) -> DatabaseResult<u64> {
        self.check_sink(&sink.table)?;
        let rows = self.sinks.entry(sink.table.clone()).or_default();
        let before = rows.len();
        match scope {
            ResetScope::Period => rows.retain(|r| r.period_key != sink.period_key),
            ResetScope::Table => rows.clear(),
        }
        Ok((before - rows.len()) as u64)
    }

    fn begin(&mut self) -> DatabaseResult<()> {
        if self.in_transaction {
            return Err(DatabaseError::TransactionFailed(
                "transaction already open".to_string(),
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> DatabaseResult<()> {
        if !self.in_transaction {
            return Err(DatabaseError::TransactionFailed(
                "no open transaction".to_string(),
            ));
        }
        self.commit_attempts += 1;
        if self.faults.fail_commit_at == Some(self.commit_attempts) {
            return Err(DatabaseError::CommitFailed(
                "injected commit failure".to_string(),
            ));
        }
        for (table, record) in self.pending.drain(..) {
            self.sinks.entry(table).or_default().push(record);
        }
        self.in_transaction = false;
        self.activity.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> DatabaseResult<()> {
        self.pending.clear();
        if self.in_transaction {
            self.activity.rollbacks += 1;
        }
        self.in_transaction = false;
        Ok(())
    }

    fn aborts_transaction_on_error(&self) -> bool {
        false
    }

    fn insert_unprepared(
        &mut self,
        sink: &SinkTarget,
        record: &OutputRecord,
    ) -> DatabaseResult<()> {
        self.write_one(&sink.table, record)
    }

    fn prepare_insert(&mut self, sink: &SinkTarget) -> DatabaseResult<()> {
        self.check_sink(&sink.table)?;
        self.prepared = Some(sink.clone());
        self.activity.prepares += 1;
        Ok(())
    }

    fn insert_prepared(&mut self, record: &OutputRecord) -> DatabaseResult<()> {
        let table = self
            .prepared
            .as_ref()
            .map(|sink| sink.table.clone())
            .ok_or_else(|| DatabaseError::InvalidInput("no prepared insert".to_string()))?;
        self.write_one(&table, record)
    }

    fn release_insert(&mut self) -> DatabaseResult<()> {
        if self.prepared.take().is_some() {
            self.activity.releases += 1;
        }
        Ok(())
    }

    fn insert_batch(
        &mut self,
        sink: &SinkTarget,
        records: &[OutputRecord],
    ) -> DatabaseResult<usize> {
        self.check_sink(&sink.table)?;
        self.count_write()?;

        let failed: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.faults.reject_ids.contains(&r.customer_id))
            .map(|(i, _)| i)
            .collect();

        if failed.is_empty() {
            for record in records {
                self.apply(&sink.table, record.clone());
            }
            return Ok(records.len());
        }

        let message = format!("injected rejection for {} row(s)", failed.len());
        if !self.faults.partial_batches {
            return Err(DatabaseError::BatchRejected {
                message,
                failed_rows: None,
            });
        }

        for (i, record) in records.iter().enumerate() {
            if !failed.contains(&i) {
                self.apply(&sink.table, record.clone());
            }
        }
        Err(DatabaseError::BatchRejected {
            message,
            failed_rows: Some(failed),
        })
    }

    fn insert_classified(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
        sink: &SinkTarget,
        rule: &ClassificationRule,
    ) -> DatabaseResult<u64> {
        self.check_sink(&sink.table)?;
        self.count_write()?;
        if self.faults.fail_set_statement {
            return Err(DatabaseError::WriteRejected(
                "injected set statement failure".to_string(),
            ));
        }

        let rows: Vec<OutputRecord> = self
            .source(source_table)?
            .iter()
            .filter(|r| !r.id.is_empty() && predicate.accepts(r))
            .filter_map(|r| {
                let code = rule.classify_record(r)?;
                OutputRecord::from_candidate(&sink.period_key, r, code)
            })
            .collect();

        let inserted = rows.len() as u64;
        for row in rows {
            self.apply(&sink.table, row);
        }
        Ok(inserted)
    }

    fn count_eligible(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
    ) -> DatabaseResult<u64> {
        Ok(self
            .source(source_table)?
            .iter()
            .filter(|r| !r.id.is_empty() && predicate.accepts(r))
            .count() as u64)
    }

    fn count_sink(&mut self, sink: &SinkTarget) -> DatabaseResult<u64> {
        self.check_sink(&sink.table)?;
        Ok(self.visible_rows(sink).count() as u64)
    }

    fn sink_summary(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<CodeSummary>> {
        self.check_sink(&sink.table)?;
        let mut totals: BTreeMap<String, (u64, Decimal)> = BTreeMap::new();
        for row in self.visible_rows(sink) {
            let entry = totals
                .entry(row.code.as_str().to_string())
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += row.credit_point;
        }

        Ok(totals
            .into_iter()
            .map(|(code, (count, sum))| code_summary(code, count, sum))
            .collect())
    }

    fn sink_rows(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<SinkRow>> {
        self.check_sink(&sink.table)?;
        let mut rows: Vec<SinkRow> = self
            .visible_rows(sink)
            .map(|r| SinkRow {
                customer_id: r.customer_id.clone(),
                code: r.code.as_str().to_string(),
                credit_point: r.credit_point,
            })
            .collect();
        rows.sort();
        Ok(rows)
    }
}
