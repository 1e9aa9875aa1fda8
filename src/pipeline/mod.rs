//! Streaming classify-and-write pipeline
//!
//! A run resets the sink for its period key, streams candidates from the
//! source, classifies each one and submits the classified rows through the
//! configured [`WriteStrategy`] under a [`CommitPolicy`]. Row and batch
//! failures are counted and isolated; fatal failures roll back the open
//! window and abort with the statistics gathered so far.
//!
//! A run owns its store connection exclusively. Two runs must never target
//! the same sink period concurrently; the pipeline does not guard against it.

pub mod commit;
pub mod compare;
pub mod errors;
pub mod source;
pub mod stats;
pub mod writer;

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::classify::ClassificationRule;
use crate::database::{
    DatabaseBackend, DatabaseError, DatabaseResult, ResetScope, SelectionPredicate, SinkTarget,
    SourceQuery,
};
use crate::models::{CandidateRecord, OutputRecord, WriteMode};
use crate::validation::{validate_period_key, validate_table_name};

pub use commit::{CommitPolicy, CommitSchedule, CommitWindow};
pub use compare::{StrategyComparison, compare_strategies};
pub use errors::{Disposition, ErrorPolicy, PipelineError};
pub use source::RecordSource;
pub use stats::{RunOutcome, RunStatistics};
pub use writer::{BatchOutcome, WriteStrategy};

/// Default rows per commit window
pub const DEFAULT_COMMIT_WINDOW: usize = 10_000;

/// Default rows buffered ahead of the consumer
pub const DEFAULT_PREFETCH_WINDOW: usize = 1_000;

/// Default rows per array-bound statement
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Upper bound on rows per array-bound statement (bind parameter limits)
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Default error ceiling
pub const DEFAULT_ERROR_CEILING: u64 = 1_000;

/// Default run-period key
pub const DEFAULT_PERIOD_KEY: &str = "202506";

/// Processed records between progress log lines
pub const PROGRESS_INTERVAL: u64 = 50_000;

/// Default enrollment cutoff.
pub fn default_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2013, 1, 1).unwrap_or_default()
}

/// Everything a run needs, passed explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Candidate table
    pub source_table: String,
    /// Sink table and period key
    pub sink: SinkTarget,
    /// Candidate selection
    pub predicate: SelectionPredicate,
    /// Evaluate the predicate in the store (otherwise after fetching)
    pub filter_at_source: bool,
    /// Rows per source round trip
    pub prefetch_window: usize,
    /// Write strategy
    pub mode: WriteMode,
    /// Rows per array-bound statement
    pub batch_size: usize,
    /// Transaction boundaries
    pub commit: CommitPolicy,
    /// Errors tolerated before the run stops
    pub error_ceiling: u64,
    /// Sink rows cleared before the run
    pub reset: ResetScope,
    /// Classification thresholds and exception clause
    pub rule: ClassificationRule,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            source_table: "customer".to_string(),
            sink: SinkTarget::new("bonus_coupon", DEFAULT_PERIOD_KEY),
            predicate: SelectionPredicate::new(default_cutoff()),
            filter_at_source: true,
            prefetch_window: DEFAULT_PREFETCH_WINDOW,
            mode: WriteMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            commit: CommitPolicy::default(),
            error_ceiling: DEFAULT_ERROR_CEILING,
            reset: ResetScope::default(),
            rule: ClassificationRule::default(),
        }
    }
}

impl RunSettings {
    /// Settings for a source/sink pair with every other value defaulted.
    pub fn new(
        source_table: impl Into<String>,
        sink_table: impl Into<String>,
        period_key: impl Into<String>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            sink: SinkTarget::new(sink_table, period_key),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_commit(mut self, commit: CommitPolicy) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_prefetch_window(mut self, prefetch_window: usize) -> Self {
        self.prefetch_window = prefetch_window;
        self
    }

    pub fn with_error_ceiling(mut self, error_ceiling: u64) -> Self {
        self.error_ceiling = error_ceiling;
        self
    }

    pub fn with_cutoff(mut self, cutoff: NaiveDate) -> Self {
        self.predicate = SelectionPredicate::new(cutoff);
        self
    }

    pub fn with_filter_at_source(mut self, filter_at_source: bool) -> Self {
        self.filter_at_source = filter_at_source;
        self
    }

    pub fn with_reset(mut self, reset: ResetScope) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rule = rule;
        self
    }

    /// Check every value that ends up in SQL text or sizes a buffer.
    pub fn validate(&self) -> Result<(), String> {
        validate_table_name(&self.source_table)
            .map_err(|e| format!("source table '{}': {}", self.source_table, e))?;
        validate_table_name(&self.sink.table)
            .map_err(|e| format!("sink table '{}': {}", self.sink.table, e))?;
        validate_period_key(&self.sink.period_key)
            .map_err(|e| format!("period key '{}': {}", self.sink.period_key, e))?;

        if self.prefetch_window == 0 {
            return Err("prefetch window must be at least 1".to_string());
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            ));
        }
        if self.commit.window() == Some(0) {
            return Err("commit window must be at least 1".to_string());
        }
        self.rule.validate()
    }

    fn source_query(&self) -> SourceQuery {
        if self.filter_at_source {
            SourceQuery::filtered(&self.source_table, self.predicate)
        } else {
            SourceQuery::unfiltered(&self.source_table)
        }
    }
}

/// Final statistics of a run together with how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub statistics: RunStatistics,
}

/// Per-record decision before anything is written.
enum Selection {
    Write(OutputRecord),
    Skip,
}

/// Runs the classify-and-write job against a store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    settings: RunSettings,
}

impl Pipeline {
    /// Create a pipeline, validating its settings.
    pub fn new(settings: RunSettings) -> Result<Self, PipelineError> {
        settings.validate().map_err(PipelineError::InvalidSettings)?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one run.
    ///
    /// Clears the sink for the run's period key first, outside any
    /// transaction. Always returns statistics: in the report on success, in
    /// [`PipelineError::Fatal`] when the run was aborted.
    pub fn run<B>(&self, store: &mut B) -> Result<RunReport, PipelineError>
    where
        B: DatabaseBackend + ?Sized,
    {
        let settings = &self.settings;
        let mut stats = RunStatistics::new(settings.mode, settings.filter_at_source);
        let started = Instant::now();

        info!(
            run_id = %stats.run_id,
            mode = %settings.mode,
            backend = store.backend_type(),
            source = %settings.source_table,
            sink = %settings.sink.table,
            period = %settings.sink.period_key,
            commit = %settings.commit,
            "Starting run"
        );

        let result = self.reset(store).and_then(|()| match settings.mode {
            WriteMode::ServerResident => self.run_server_resident(store, &mut stats),
            _ => self.run_row_wise(store, &mut stats),
        });
        stats.elapsed = started.elapsed();

        match result {
            Ok(outcome) => {
                info!(
                    run_id = %stats.run_id,
                    outcome = %outcome,
                    processed = stats.processed,
                    written = stats.written,
                    errors = stats.errors,
                    commits = stats.commits,
                    elapsed = %stats.duration_string(),
                    "Run finished"
                );
                Ok(RunReport {
                    outcome,
                    statistics: stats,
                })
            }
            Err(e) => {
                error!(
                    run_id = %stats.run_id,
                    written = stats.written,
                    error = %e,
                    "Run aborted"
                );
                Err(PipelineError::Fatal {
                    source: e,
                    statistics: Box::new(stats),
                })
            }
        }
    }

    fn reset<B>(&self, store: &mut B) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        let removed = store.reset_sink(&self.settings.sink, self.settings.reset)?;
        info!(
            removed,
            scope = %self.settings.reset,
            sink = %self.settings.sink.table,
            "Sink reset"
        );
        Ok(())
    }

    /// Single statement, single commit.
    fn run_server_resident<B>(
        &self,
        store: &mut B,
        stats: &mut RunStatistics,
    ) -> DatabaseResult<RunOutcome>
    where
        B: DatabaseBackend + ?Sized,
    {
        let settings = &self.settings;
        let strategy = WriteStrategy::ServerResident;
        let mut window = CommitWindow::new(CommitPolicy::AtEnd);

        window.ensure_open(store)?;
        stats.batches = 1;
        let inserted = match strategy.write_set(
            store,
            &settings.source_table,
            &settings.predicate,
            &settings.sink,
            &settings.rule,
        ) {
            Ok(inserted) => inserted,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Set statement rejected, rolling back");
                stats.errors = 1;
                window.abort(store, stats);
                return Ok(RunOutcome::StatementFailed);
            }
            Err(e) => {
                window.abort(store, stats);
                return Err(e);
            }
        };

        let eligible = match store.count_eligible(&settings.source_table, &settings.predicate) {
            Ok(eligible) => eligible,
            Err(e) => {
                window.abort(store, stats);
                return Err(e);
            }
        };

        // Rows were written by the store; the window only owns the transaction
        if let Err(e) = store.commit() {
            error!(error = %e, "Commit failed, rolling back");
            window.abort(store, stats);
            return Err(match e {
                DatabaseError::CommitFailed(_) => e,
                other => DatabaseError::CommitFailed(other.to_string()),
            });
        }
        stats.commits = 1;
        stats.written = inserted;
        stats.processed = eligible;
        stats.unclassified = eligible.saturating_sub(inserted);
        Ok(RunOutcome::Completed)
    }

    /// Client-side classification with one of the three row-wise strategies.
    fn run_row_wise<B>(&self, store: &mut B, stats: &mut RunStatistics) -> DatabaseResult<RunOutcome>
    where
        B: DatabaseBackend + ?Sized,
    {
        let strategy = WriteStrategy::from_mode(self.settings.mode, self.settings.batch_size);
        strategy.open(store, &self.settings.sink)?;

        let mut window = CommitWindow::new(self.settings.commit);
        let mut source =
            RecordSource::open(self.settings.source_query(), self.settings.prefetch_window);

        let result = match strategy {
            WriteStrategy::ArrayBatch { .. } => {
                self.stream_batches(store, &strategy, &mut window, &mut source, stats)
            }
            _ => self.stream_rows(store, &strategy, &mut window, &mut source, stats),
        }
        .and_then(|outcome| window.commit(store, stats).map(|()| outcome));

        stats.fetches = source.round_trips();
        if result.is_err() {
            window.abort(store, stats);
        }
        strategy.close(store);
        result
    }

    fn stream_rows<B>(
        &self,
        store: &mut B,
        strategy: &WriteStrategy,
        window: &mut CommitWindow,
        source: &mut RecordSource,
        stats: &mut RunStatistics,
    ) -> DatabaseResult<RunOutcome>
    where
        B: DatabaseBackend + ?Sized,
    {
        let policy = ErrorPolicy::new(self.settings.error_ceiling);
        let sink = &self.settings.sink;

        while let Some(record) = source.next_record(store)? {
            let Selection::Write(output) = self.select(&record, stats) else {
                continue;
            };

            window.ensure_open(store)?;
            stats.batches += 1;
            match strategy.write_row(store, sink, &output) {
                Ok(()) => window.accept([output]),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.errors += 1;
                    match policy.disposition(&e, stats.errors) {
                        Disposition::Abort => return Err(e),
                        disposition => {
                            warn!(customer_id = %output.customer_id, error = %e, "Row write failed");
                            if store.aborts_transaction_on_error() {
                                window.replay(store, sink, stats)?;
                            }
                            if disposition == Disposition::StopAtCeiling {
                                warn!(
                                    errors = stats.errors,
                                    ceiling = policy.ceiling(),
                                    "Error ceiling exceeded, stopping run"
                                );
                                return Ok(RunOutcome::ErrorCeilingReached);
                            }
                        }
                    }
                }
            }

            if window.is_due() {
                window.commit(store, stats)?;
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Array-bound writes. Chunks are sized so a batch never straddles a
    /// commit boundary.
    fn stream_batches<B>(
        &self,
        store: &mut B,
        strategy: &WriteStrategy,
        window: &mut CommitWindow,
        source: &mut RecordSource,
        stats: &mut RunStatistics,
    ) -> DatabaseResult<RunOutcome>
    where
        B: DatabaseBackend + ?Sized,
    {
        let policy = ErrorPolicy::new(self.settings.error_ceiling);
        let sink = &self.settings.sink;

        loop {
            let size = window
                .remaining()
                .map_or(strategy.batch_size(), |room| room.min(strategy.batch_size()));
            let chunk = source.next_chunk(store, size)?;
            if chunk.is_empty() {
                break;
            }

            let batch: Vec<OutputRecord> = chunk
                .iter()
                .filter_map(|record| match self.select(record, stats) {
                    Selection::Write(output) => Some(output),
                    Selection::Skip => None,
                })
                .collect();
            if batch.is_empty() {
                continue;
            }

            window.ensure_open(store)?;
            stats.batches += 1;
            let outcome = strategy.write_batch(store, sink, batch)?;
            let failure = outcome.error;
            window.accept(outcome.accepted);

            if let Some(e) = failure {
                stats.errors += outcome.rejected as u64;
                warn!(rejected = outcome.rejected, error = %e, "Batch write failed");
                if store.aborts_transaction_on_error() {
                    window.replay(store, sink, stats)?;
                }
                if policy.disposition(&e, stats.errors) == Disposition::StopAtCeiling {
                    warn!(
                        errors = stats.errors,
                        ceiling = policy.ceiling(),
                        "Error ceiling exceeded, stopping run"
                    );
                    return Ok(RunOutcome::ErrorCeilingReached);
                }
            }

            if window.is_due() {
                window.commit(store, stats)?;
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Count the record and decide whether it produces a sink row.
    fn select(&self, record: &CandidateRecord, stats: &mut RunStatistics) -> Selection {
        stats.processed += 1;
        if stats.processed % PROGRESS_INTERVAL == 0 {
            info!(
                processed = stats.processed,
                written = stats.written,
                errors = stats.errors,
                "Progress"
            );
        }

        if !self.settings.filter_at_source
            && !self
                .settings
                .predicate
                .admits_enrollment(record.enrolled_at)
        {
            stats.filtered += 1;
            return Selection::Skip;
        }

        if !record.is_complete() {
            warn!(
                id = %record.id,
                email = record.email.is_some(),
                credit_limit = record.credit_limit.is_some(),
                "Skipping incomplete record"
            );
            stats.excluded += 1;
            return Selection::Skip;
        }

        let Some(code) = self.settings.rule.classify_record(record) else {
            stats.unclassified += 1;
            return Selection::Skip;
        };

        match OutputRecord::from_candidate(&self.settings.sink.period_key, record, code) {
            Some(output) => Selection::Write(output),
            None => {
                stats.excluded += 1;
                Selection::Skip
            }
        }
    }
}

/// Validate `settings` and execute one run.
pub fn run<B>(store: &mut B, settings: RunSettings) -> Result<RunReport, PipelineError>
where
    B: DatabaseBackend + ?Sized,
{
    Pipeline::new(settings)?.run(store)
}
