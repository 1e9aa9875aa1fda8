//! Failure handling for pipeline runs

use crate::database::DatabaseError;

use super::RunReport;
use super::stats::{RunOutcome, RunStatistics};

/// What the pipeline does after a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Count the failure and move on to the next unit
    Continue,
    /// Stop reading; commit what was accepted and report the ceiling
    StopAtCeiling,
    /// Roll back the open window and abort the run
    Abort,
}

/// Circuit breaker over row and batch failures.
///
/// Failed units are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    ceiling: u64,
}

impl ErrorPolicy {
    /// Stop once more than `ceiling` errors were counted.
    pub fn new(ceiling: u64) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Whether the error count has passed the ceiling.
    pub fn exceeded(&self, errors: u64) -> bool {
        errors > self.ceiling
    }

    /// Decide how to proceed after `error`, given the error count including it.
    pub fn disposition(&self, error: &DatabaseError, errors: u64) -> Disposition {
        if error.is_fatal() {
            Disposition::Abort
        } else if self.exceeded(errors) {
            Disposition::StopAtCeiling
        } else {
            Disposition::Continue
        }
    }
}

/// Error type for pipeline runs
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Run settings failed validation; nothing was touched
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A fatal store failure aborted the run after rolling back the open window
    #[error("Run aborted after {} rows written: {source}", .statistics.written)]
    Fatal {
        source: DatabaseError,
        /// Counts at the moment of abort
        statistics: Box<RunStatistics>,
    },
}

impl PipelineError {
    /// Partial statistics of an aborted run.
    pub fn statistics(&self) -> Option<&RunStatistics> {
        match self {
            PipelineError::Fatal { statistics, .. } => Some(statistics),
            PipelineError::InvalidSettings(_) => None,
        }
    }

    /// Report of an aborted run, carrying the counts gathered before the abort.
    pub fn partial_report(&self) -> Option<RunReport> {
        self.statistics().map(|statistics| RunReport {
            outcome: RunOutcome::Aborted,
            statistics: statistics.clone(),
        })
    }
}
