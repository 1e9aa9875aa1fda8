//! Transaction boundaries
//!
//! A [`CommitWindow`] holds every record accepted since the last commit.
//! Records only count as written once the commit that covers them succeeds.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::database::{DatabaseBackend, DatabaseError, DatabaseResult, SinkTarget};
use crate::models::OutputRecord;

use super::MAX_BATCH_SIZE;
use super::stats::RunStatistics;

/// When to commit, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitSchedule {
    /// After every accepted write
    PerWrite,
    /// After every `window` accepted rows
    #[default]
    EveryN,
    /// Once, when the source is exhausted
    AtEnd,
}

impl std::str::FromStr for CommitSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "per-write" | "each" => Ok(CommitSchedule::PerWrite),
            "every-n" | "window" => Ok(CommitSchedule::EveryN),
            "at-end" | "end" => Ok(CommitSchedule::AtEnd),
            _ => Err(format!(
                "Unknown commit policy: {}. Use 'per-write', 'every-n' or 'at-end'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for CommitSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitSchedule::PerWrite => write!(f, "per-write"),
            CommitSchedule::EveryN => write!(f, "every-n"),
            CommitSchedule::AtEnd => write!(f, "at-end"),
        }
    }
}

/// Commit policy of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    PerWrite,
    EveryN(usize),
    AtEnd,
}

impl CommitPolicy {
    /// Build a policy from its configured schedule and window size.
    pub fn new(schedule: CommitSchedule, window: usize) -> Self {
        match schedule {
            CommitSchedule::PerWrite => CommitPolicy::PerWrite,
            CommitSchedule::EveryN => CommitPolicy::EveryN(window),
            CommitSchedule::AtEnd => CommitPolicy::AtEnd,
        }
    }

    /// Accepted rows that close a window; `None` when only the end of the run does.
    pub fn window(&self) -> Option<usize> {
        match self {
            CommitPolicy::PerWrite => Some(1),
            CommitPolicy::EveryN(n) => Some(*n),
            CommitPolicy::AtEnd => None,
        }
    }

    pub fn schedule(&self) -> CommitSchedule {
        match self {
            CommitPolicy::PerWrite => CommitSchedule::PerWrite,
            CommitPolicy::EveryN(_) => CommitSchedule::EveryN,
            CommitPolicy::AtEnd => CommitSchedule::AtEnd,
        }
    }
}

impl Default for CommitPolicy {
    fn default() -> Self {
        CommitPolicy::EveryN(super::DEFAULT_COMMIT_WINDOW)
    }
}

impl std::fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitPolicy::EveryN(n) => write!(f, "every-n ({})", n),
            other => write!(f, "{}", other.schedule()),
        }
    }
}

/// The open transaction and the records accepted into it.
#[derive(Debug)]
pub struct CommitWindow {
    policy: CommitPolicy,
    pending: Vec<OutputRecord>,
    open: bool,
}

impl CommitWindow {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
            open: false,
        }
    }

    /// Rows accepted since the last commit.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Room left before the window closes, if it closes before the end.
    pub fn remaining(&self) -> Option<usize> {
        self.policy
            .window()
            .map(|window| window.saturating_sub(self.pending.len()).max(1))
    }

    /// Begin a transaction unless one is already open.
    pub fn ensure_open<B>(&mut self, store: &mut B) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        if !self.open {
            store.begin()?;
            self.open = true;
        }
        Ok(())
    }

    /// Record rows the store accepted in the open transaction.
    pub fn accept(&mut self, records: impl IntoIterator<Item = OutputRecord>) {
        self.pending.extend(records);
    }

    /// Whether the policy wants a commit now.
    pub fn is_due(&self) -> bool {
        self.policy
            .window()
            .is_some_and(|window| self.pending.len() >= window)
    }

    /// Commit the open window.
    ///
    /// On success the pending rows become written. A failed commit rolls the
    /// window back and is returned as a fatal error. A window with nothing
    /// pending is closed without counting a commit.
    pub fn commit<B>(&mut self, store: &mut B, stats: &mut RunStatistics) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        if !self.open {
            return Ok(());
        }

        if self.pending.is_empty() {
            self.open = false;
            return store.rollback();
        }

        match store.commit() {
            Ok(()) => {
                self.open = false;
                stats.written += self.pending.len() as u64;
                stats.commits += 1;
                self.pending.clear();
                debug!(
                    commits = stats.commits,
                    written = stats.written,
                    "Committed window"
                );
                Ok(())
            }
            Err(e) => {
                error!(pending = self.pending.len(), error = %e, "Commit failed, rolling back window");
                self.abort(store, stats);
                Err(match e {
                    DatabaseError::CommitFailed(_) => e,
                    other => DatabaseError::CommitFailed(other.to_string()),
                })
            }
        }
    }

    /// Restore the window after a failure poisoned the transaction.
    ///
    /// Rolls back, opens a fresh transaction and re-submits every pending
    /// row. The failed unit is not part of the pending rows and is not
    /// retried. Any failure here is fatal.
    pub fn replay<B>(
        &mut self,
        store: &mut B,
        sink: &SinkTarget,
        stats: &mut RunStatistics,
    ) -> DatabaseResult<()>
    where
        B: DatabaseBackend + ?Sized,
    {
        store.rollback()?;
        self.open = false;
        stats.rollbacks += 1;

        store.begin()?;
        self.open = true;

        for chunk in self.pending.chunks(MAX_BATCH_SIZE) {
            store.insert_batch(sink, chunk).map_err(|e| {
                DatabaseError::TransactionFailed(format!(
                    "Failed to restore {} pending rows: {}",
                    chunk.len(),
                    e
                ))
            })?;
        }
        stats.replays += 1;
        debug!(restored = self.pending.len(), "Replayed window");
        Ok(())
    }

    /// Discard the open window. Never fails; a failed rollback is logged.
    pub fn abort<B>(&mut self, store: &mut B, stats: &mut RunStatistics)
    where
        B: DatabaseBackend + ?Sized,
    {
        if self.open {
            match store.rollback() {
                Ok(()) => stats.rollbacks += 1,
                Err(e) => error!(error = %e, "Rollback failed"),
            }
            self.open = false;
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{FaultPlan, MemoryBackend};
    use crate::models::{CategoryCode, WriteMode};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn output(id: &str) -> OutputRecord {
        OutputRecord {
            period_key: "202506".into(),
            customer_id: id.into(),
            email: format!("{}@example.com", id),
            code: CategoryCode::Dd,
            credit_point: Decimal::from(5000),
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

    fn stats() -> RunStatistics {
        RunStatistics::new(WriteMode::PerRow, true)
    }

    #[test]
    fn test_schedule_from_str() {
        assert_eq!(
            CommitSchedule::from_str("per_write").unwrap(),
            CommitSchedule::PerWrite
        );
        assert_eq!(
            CommitSchedule::from_str("every-n").unwrap(),
            CommitSchedule::EveryN
        );
        assert_eq!(
            CommitSchedule::from_str("AT-END").unwrap(),
            CommitSchedule::AtEnd
        );
        assert!(CommitSchedule::from_str("sometimes").is_err());
    }

    #[test]
    fn test_policy_windows() {
        assert_eq!(CommitPolicy::PerWrite.window(), Some(1));
        assert_eq!(CommitPolicy::new(CommitSchedule::EveryN, 3).window(), Some(3));
        assert_eq!(CommitPolicy::AtEnd.window(), None);
        assert_eq!(CommitPolicy::default(), CommitPolicy::EveryN(10_000));
    }

    #[test]
    fn test_rows_count_only_after_commit() {
        let mut store = store(FaultPlan::default());
        let mut stats = stats();
        let mut window = CommitWindow::new(CommitPolicy::EveryN(2));

        window.ensure_open(&mut store).unwrap();
        store.insert_batch(&sink(), &[output("C1")]).unwrap();
        window.accept([output("C1")]);
        assert!(!window.is_due());
        assert_eq!(stats.written, 0);

        store.insert_batch(&sink(), &[output("C2")]).unwrap();
        window.accept([output("C2")]);
        assert!(window.is_due());
        window.commit(&mut store, &mut stats).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.commits, 1);
        assert_eq!(window.pending(), 0);
        assert!(!window.is_open());
    }

    #[test]
    fn test_empty_window_is_not_a_commit() {
        let mut store = store(FaultPlan::default());
        let mut stats = stats();
        let mut window = CommitWindow::new(CommitPolicy::AtEnd);

        window.ensure_open(&mut store).unwrap();
        window.commit(&mut store, &mut stats).unwrap();
        assert_eq!(stats.commits, 0);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let mut store = store(FaultPlan {
            fail_commit_at: Some(1),
            ..FaultPlan::default()
        });
        let mut stats = stats();
        let mut window = CommitWindow::new(CommitPolicy::AtEnd);

        window.ensure_open(&mut store).unwrap();
        store.insert_batch(&sink(), &[output("C1")]).unwrap();
        window.accept([output("C1")]);

        let err = window.commit(&mut store, &mut stats).unwrap_err();
        assert!(matches!(err, DatabaseError::CommitFailed(_)));
        assert_eq!(stats.written, 0);
        assert_eq!(stats.rollbacks, 1);
        assert!(store.committed_rows("bonus_coupon").is_empty());
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_replay_restores_pending_rows() {
        let mut store = store(FaultPlan::default());
        let mut stats = stats();
        let mut window = CommitWindow::new(CommitPolicy::EveryN(10));

        window.ensure_open(&mut store).unwrap();
        store.insert_batch(&sink(), &[output("C1"), output("C2")]).unwrap();
        window.accept([output("C1"), output("C2")]);

        window.replay(&mut store, &sink(), &mut stats).unwrap();
        assert_eq!(stats.replays, 1);
        assert_eq!(stats.rollbacks, 1);
        assert!(window.is_open());

        window.commit(&mut store, &mut stats).unwrap();
        assert_eq!(store.committed_rows("bonus_coupon").len(), 2);
        assert_eq!(stats.written, 2);
    }

    #[test]
    fn test_remaining_never_zero() {
        let mut window = CommitWindow::new(CommitPolicy::EveryN(3));
        assert_eq!(window.remaining(), Some(3));
        window.accept([output("C1"), output("C2")]);
        assert_eq!(window.remaining(), Some(1));
        assert_eq!(CommitWindow::new(CommitPolicy::AtEnd).remaining(), None);
    }
}
