//! Post-run verification
//!
//! Compares what a run issued for its period key against an independently
//! counted target. A mismatch is reported, never raised.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::{DatabaseBackend, DatabaseResult, SelectionPredicate, SinkTarget};
use crate::models::CodeSummary;

/// Default accepted deviation of issued from target, in percent
pub const DEFAULT_TOLERANCE_PERCENT: f64 = 1.0;

/// Outcome of a reconciliation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Period key that was checked
    pub period_key: String,
    /// Per-code counts and average limits, ordered by code
    pub summaries: Vec<CodeSummary>,
    /// Sink rows for the period key
    pub issued: u64,
    /// Eligible candidates in the source
    pub target: u64,
    /// Issued as a percentage of target; `None` when the target is zero
    pub ratio_percent: Option<f64>,
    /// Accepted deviation from 100%
    pub tolerance_percent: f64,
    /// Whether the ratio lies within tolerance
    pub within_tolerance: bool,
}

impl ReconciliationReport {
    /// Build a report from raw counts.
    pub fn new(
        period_key: impl Into<String>,
        summaries: Vec<CodeSummary>,
        issued: u64,
        target: u64,
        tolerance_percent: f64,
    ) -> Self {
        let ratio_percent = (target > 0).then(|| issued as f64 * 100.0 / target as f64);
        let within_tolerance = match ratio_percent {
            Some(ratio) => (ratio - 100.0).abs() <= tolerance_percent,
            None => issued == 0,
        };

        Self {
            period_key: period_key.into(),
            summaries,
            issued,
            target,
            ratio_percent,
            tolerance_percent,
            within_tolerance,
        }
    }

    /// Rows per code summed over the summaries.
    pub fn summarized_rows(&self) -> u64 {
        self.summaries.iter().map(|s| s.count).sum()
    }
}

/// Query the sink and source and compare issued against target.
pub fn reconcile<B>(
    store: &mut B,
    source_table: &str,
    predicate: &SelectionPredicate,
    sink: &SinkTarget,
    tolerance_percent: f64,
) -> DatabaseResult<ReconciliationReport>
where
    B: DatabaseBackend + ?Sized,
{
    let summaries = store.sink_summary(sink)?;
    let issued = store.count_sink(sink)?;
    let target = store.count_eligible(source_table, predicate)?;

    let report = ReconciliationReport::new(
        &sink.period_key,
        summaries,
        issued,
        target,
        tolerance_percent,
    );

    if report.within_tolerance {
        info!(issued, target, period = %sink.period_key, "Reconciliation passed");
    } else {
        warn!(
            issued,
            target,
            ratio = ?report.ratio_percent,
            tolerance = tolerance_percent,
            period = %sink.period_key,
            "Issued count outside tolerance"
        );
    }

    Ok(report)
}
