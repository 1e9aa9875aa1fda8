//! Coupon Pipeline - classify-and-write benchmark over interchangeable write strategies
//!
//! Provides unified interfaces for:
//! - Candidate classification into coupon codes
//! - Streaming runs under four write strategies and three commit policies
//! - Store backends (DuckDB, PostgreSQL, in-process)
//! - Configuration, synthetic data and post-run reconciliation

pub mod classify;
#[cfg(feature = "cli")]
pub mod cli;
pub mod database;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod seed;
pub mod validation;

// Re-export commonly used types
pub use classify::{ClassificationRule, ExceptionClause, classify};
pub use database::{
    DatabaseBackend, DatabaseError, DatabaseResult, FaultPlan, MemoryBackend, PipelineConfig,
    ResetScope, SelectionPredicate, SinkTarget,
};
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDBBackend;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
pub use pipeline::{
    CommitPolicy, CommitSchedule, ErrorPolicy, Pipeline, PipelineError, RunOutcome, RunReport,
    RunSettings, RunStatistics, StrategyComparison, compare_strategies, run,
};
pub use reconcile::{ReconciliationReport, reconcile};

// Re-export models
pub use models::enums::*;
pub use models::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};
