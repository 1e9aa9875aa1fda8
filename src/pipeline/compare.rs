//! Cross-strategy comparison
//!
//! Runs every write mode against the same store and checks that they leave
//! identical (identifier, code, limit) rows behind.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::DatabaseBackend;
use crate::models::{SinkRow, WriteMode};

use super::{Pipeline, PipelineError, RunReport, RunSettings};

/// Reports of every mode plus the equivalence verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyComparison {
    /// One report per mode, in [`WriteMode::ALL`] order
    pub reports: Vec<RunReport>,
    /// Rows left by the first mode, sorted
    pub reference_rows: Vec<SinkRow>,
    /// Modes whose rows differ from the reference
    pub mismatched: Vec<WriteMode>,
}

impl StrategyComparison {
    /// Whether every mode produced the same rows.
    pub fn is_equivalent(&self) -> bool {
        self.mismatched.is_empty()
    }

    /// Report of one mode.
    pub fn report(&self, mode: WriteMode) -> Option<&RunReport> {
        self.reports.iter().find(|r| r.statistics.mode == mode)
    }
}

/// Run all four modes in turn with otherwise identical settings.
///
/// Each run resets the sink for the period key first, so the rows read back
/// after a run are exactly that run's output.
pub fn compare_strategies<B>(
    store: &mut B,
    settings: &RunSettings,
) -> Result<StrategyComparison, PipelineError>
where
    B: DatabaseBackend + ?Sized,
{
    let mut reports = Vec::with_capacity(WriteMode::ALL.len());
    let mut reference_rows: Option<Vec<SinkRow>> = None;
    let mut mismatched = Vec::new();

    for mode in WriteMode::ALL {
        let pipeline = Pipeline::new(settings.clone().with_mode(mode))?;
        let report = pipeline.run(store)?;

        let mut rows = store
            .sink_rows(&settings.sink)
            .map_err(|e| PipelineError::Fatal {
                source: e,
                statistics: Box::new(report.statistics.clone()),
            })?;
        rows.sort();

        match reference_rows.as_ref() {
            Some(reference) if *reference != rows => {
                warn!(
                    mode = %mode,
                    expected = reference.len(),
                    actual = rows.len(),
                    "Sink rows differ from reference"
                );
                mismatched.push(mode);
            }
            Some(_) => {}
            None => reference_rows = Some(rows),
        }

        info!(
            mode = %mode,
            written = report.statistics.written,
            elapsed = %report.statistics.duration_string(),
            "Strategy finished"
        );
        reports.push(report);
    }

    Ok(StrategyComparison {
        reports,
        reference_rows: reference_rows.unwrap_or_default(),
        mismatched,
    })
}
