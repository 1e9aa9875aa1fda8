//! Run statistics and outcomes

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::WriteMode;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The source was exhausted and every window committed
    #[default]
    Completed,
    /// Errors exceeded the configured ceiling; work up to that point was committed
    ErrorCeilingReached,
    /// The server-resident statement was rejected and rolled back
    StatementFailed,
    /// A fatal store failure stopped the run; only committed windows remain
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::ErrorCeilingReached => write!(f, "error ceiling reached"),
            RunOutcome::StatementFailed => write!(f, "statement failed"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Counters accumulated over one run.
///
/// `written` only ever grows when a commit succeeds, so it always equals the
/// number of rows the run made durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Write strategy used
    pub mode: WriteMode,
    /// Whether the selection predicate ran in the store
    pub filtered_at_source: bool,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Records read from the source
    pub processed: u64,
    /// Records missing a required field
    pub excluded: u64,
    /// Records rejected by the client-side predicate
    pub filtered: u64,
    /// Complete records without a category
    pub unclassified: u64,
    /// Rows made durable
    pub written: u64,
    /// Rows lost to row or batch failures
    pub errors: u64,
    /// Successful commits
    pub commits: u64,
    /// Rollbacks that discarded or recovered a window
    pub rollbacks: u64,
    /// Write statements executed
    pub batches: u64,
    /// Source round trips
    pub fetches: u64,
    /// Window re-submissions after a failure poisoned the transaction
    pub replays: u64,
    /// Run duration
    pub elapsed: Duration,
}

impl RunStatistics {
    /// Start a fresh accumulator.
    pub fn new(mode: WriteMode, filtered_at_source: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            filtered_at_source,
            started_at: Utc::now(),
            processed: 0,
            excluded: 0,
            filtered: 0,
            unclassified: 0,
            written: 0,
            errors: 0,
            commits: 0,
            rollbacks: 0,
            batches: 0,
            fetches: 0,
            replays: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Processed records per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Average rows per write statement.
    pub fn rows_per_statement(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.written as f64 / self.batches as f64
        }
    }

    /// Elapsed time formatted for humans.
    pub fn duration_string(&self) -> String {
        let ms = self.elapsed.as_millis();
        if ms < 1000 {
            format!("{}ms", ms)
        } else if ms < 60_000 {
            format!("{:.2}s", self.elapsed.as_secs_f64())
        } else {
            let secs = self.elapsed.as_secs();
            format!("{}m {}s", secs / 60, secs % 60)
        }
    }
}
