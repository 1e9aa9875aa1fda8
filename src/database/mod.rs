//! Database backend abstraction for the classify-and-write pipeline
//!
//! This module provides the store connection the pipeline drives:
//! - DuckDB: Embedded database for local benchmarking and tests
//! - PostgreSQL: For runs against a server
//! - Memory: In-process store with fault injection for failure drills
//!
//! A backend is owned exclusively by one run. All operations block the
//! calling thread until the store answers.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationRule;
use crate::models::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};

// Re-export implementations based on features
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod memory;
pub mod schema;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use config::PipelineConfig;
pub use memory::{FaultPlan, MemoryBackend};
pub use schema::{DatabaseSchema, Placeholder, SqlBuilder};

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Read query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A single-row write was rejected
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// A multi-row write was rejected
    ///
    /// `failed_rows` lists the offending positions when the store reports
    /// them; the remaining rows of the batch were applied. `None` means the
    /// whole batch failed.
    #[error("Batch rejected: {message}")]
    BatchRejected {
        message: String,
        failed_rows: Option<Vec<usize>>,
    },

    /// Commit failed
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction control failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl DatabaseError {
    /// Whether the failure must abort the run.
    ///
    /// Row and batch rejections are scoped to the unit that caused them;
    /// everything else means the store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DatabaseError::WriteRejected(_) | DatabaseError::BatchRejected { .. }
        )
    }
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Which sink rows are cleared before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Only rows carrying the run's period key (default)
    #[default]
    Period,
    /// Every row in the sink table
    Table,
}

impl std::str::FromStr for ResetScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "period" => Ok(ResetScope::Period),
            "table" => Ok(ResetScope::Table),
            _ => Err(format!(
                "Unknown reset scope: {}. Use 'period' or 'table'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for ResetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetScope::Period => write!(f, "period"),
            ResetScope::Table => write!(f, "table"),
        }
    }
}

/// Candidate selection: enrolled on or after `cutoff` with every required
/// field present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPredicate {
    /// First enrollment date that qualifies
    pub cutoff: NaiveDate,
}

impl SelectionPredicate {
    /// Create a predicate for a cutoff date.
    pub fn new(cutoff: NaiveDate) -> Self {
        Self { cutoff }
    }

    /// Whether the enrollment timestamp is on or after the cutoff.
    ///
    /// A missing timestamp never qualifies.
    pub fn admits_enrollment(&self, enrolled_at: Option<NaiveDateTime>) -> bool {
        enrolled_at.is_some_and(|ts| ts.date() >= self.cutoff)
    }

    /// Evaluate the full predicate against a record.
    pub fn accepts(&self, record: &CandidateRecord) -> bool {
        self.admits_enrollment(record.enrolled_at) && record.is_complete()
    }
}

/// Read query against the candidate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    /// Candidate table
    pub table: String,
    /// Predicate evaluated by the store; `None` fetches every row
    pub predicate: Option<SelectionPredicate>,
}

impl SourceQuery {
    /// Query with the predicate evaluated in the store.
    pub fn filtered(table: impl Into<String>, predicate: SelectionPredicate) -> Self {
        Self {
            table: table.into(),
            predicate: Some(predicate),
        }
    }

    /// Query that transfers every row; selection happens client-side.
    pub fn unfiltered(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: None,
        }
    }
}

/// Sink table and the period key the run writes under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkTarget {
    /// Output table
    pub table: String,
    /// Run-period key
    pub period_key: String,
}

impl SinkTarget {
    /// Create a sink target.
    pub fn new(table: impl Into<String>, period_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            period_key: period_key.into(),
        }
    }
}

/// Store connection driven by the pipeline.
///
/// Transaction control is explicit: `begin` opens a transaction that stays
/// open until `commit` or `rollback`. Writes issued outside a transaction
/// are applied immediately.
pub trait DatabaseBackend {
    /// Get the database backend type name
    ///
    /// # Returns
    /// Backend type string ("duckdb", "postgres" or "memory")
    fn backend_type(&self) -> &'static str;

    /// Create the candidate and sink tables if they don't exist.
    fn initialize(&mut self, source_table: &str, sink_table: &str) -> DatabaseResult<()>;

    /// Check if the store is reachable.
    fn health_check(&mut self) -> DatabaseResult<bool>;

    /// Bulk-load candidate rows into the source table.
    ///
    /// # Returns
    /// Number of rows loaded
    fn load_candidates(
        &mut self,
        source_table: &str,
        records: &[CandidateRecord],
    ) -> DatabaseResult<usize>;

    /// Fetch one page of candidates ordered by identifier.
    ///
    /// # Arguments
    /// * `query` - Table and optional predicate
    /// * `after_id` - Last identifier of the previous page, `None` for the first page
    /// * `limit` - Maximum rows in the page
    ///
    /// # Returns
    /// Up to `limit` records; an empty page means the source is exhausted
    fn fetch_candidates(
        &mut self,
        query: &SourceQuery,
        after_id: Option<&str>,
        limit: usize,
    ) -> DatabaseResult<Vec<CandidateRecord>>;

    /// Clear prior sink rows.
    ///
    /// # Returns
    /// Number of rows removed
    fn reset_sink(&mut self, sink: &SinkTarget, scope: ResetScope) -> DatabaseResult<u64>;

    /// Open a transaction.
    fn begin(&mut self) -> DatabaseResult<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> DatabaseResult<()>;

    /// Discard the open transaction.
    fn rollback(&mut self) -> DatabaseResult<()>;

    /// Whether a rejected write leaves the open transaction unusable.
    ///
    /// When true, the caller must roll back and re-submit the surviving
    /// writes of the transaction before continuing.
    fn aborts_transaction_on_error(&self) -> bool {
        true
    }

    /// Write one row with a freshly built literal statement.
    fn insert_unprepared(&mut self, sink: &SinkTarget, record: &OutputRecord)
    -> DatabaseResult<()>;

    /// Prepare the parameterized insert used by `insert_prepared`.
    fn prepare_insert(&mut self, sink: &SinkTarget) -> DatabaseResult<()>;

    /// Bind one row into the prepared insert and execute it.
    fn insert_prepared(&mut self, record: &OutputRecord) -> DatabaseResult<()>;

    /// Release the prepared insert. Safe to call when nothing is prepared.
    fn release_insert(&mut self) -> DatabaseResult<()>;

    /// Write rows as a single multi-row statement.
    ///
    /// # Returns
    /// Number of rows applied
    fn insert_batch(&mut self, sink: &SinkTarget, records: &[OutputRecord])
    -> DatabaseResult<usize>;

    /// Read, classify and insert in one server-side statement.
    ///
    /// # Returns
    /// Number of rows inserted
    fn insert_classified(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
        sink: &SinkTarget,
        rule: &ClassificationRule,
    ) -> DatabaseResult<u64>;

    /// Count candidates satisfying the predicate.
    fn count_eligible(
        &mut self,
        source_table: &str,
        predicate: &SelectionPredicate,
    ) -> DatabaseResult<u64>;

    /// Count sink rows for the period key.
    fn count_sink(&mut self, sink: &SinkTarget) -> DatabaseResult<u64>;

    /// Per-code counts and average limits for the period key, ordered by code.
    fn sink_summary(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<CodeSummary>>;

    /// Every sink row for the period key, ordered by identifier.
    fn sink_rows(&mut self, sink: &SinkTarget) -> DatabaseResult<Vec<SinkRow>>;
}

/// Parse a timestamp rendered as text by the store.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fraction]`, the ISO `T` separator and bare
/// dates.
pub(crate) fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Build a per-code summary from a count and an exact sum of limits.
///
/// The average is rounded to two places, halves away from zero.
pub(crate) fn code_summary(code: String, count: u64, sum: rust_decimal::Decimal) -> CodeSummary {
    let average_point = if count == 0 {
        rust_decimal::Decimal::ZERO
    } else {
        (sum / rust_decimal::Decimal::from(count))
            .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
    };
    CodeSummary {
        code,
        count,
        average_point,
    }
}

/// Parse a decimal rendered as text by the store.
pub(crate) fn parse_decimal(text: &str) -> Option<rust_decimal::Decimal> {
    use std::str::FromStr;
    rust_decimal::Decimal::from_str(text.trim()).ok()
}

/// Decimal places the limit columns hold
pub const LIMIT_SCALE: u32 = 2;

/// Refuse candidates whose limit the store would have to round.
///
/// Trailing zeros are ignored, so `3000.500` is accepted.
pub fn check_limit_scale(records: &[CandidateRecord]) -> DatabaseResult<()> {
    for record in records {
        if let Some(limit) = record.credit_limit
            && limit.normalize().scale() > LIMIT_SCALE
        {
            return Err(DatabaseError::InvalidInput(format!(
                "Limit {} of candidate '{}' has more than {} decimal places",
                limit, record.id, LIMIT_SCALE
            )));
        }
    }
    Ok(())
}
