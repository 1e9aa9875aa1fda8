//! Post-run reconciliation command

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_store};
use crate::cli::error::CliError;
use crate::cli::report::{OutputFormat, render_reconciliation};
use crate::reconcile::reconcile;

/// Reconcile command arguments
#[derive(Debug, Clone)]
pub struct ReconcileArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Run-period key (defaults to the configured one)
    pub period: Option<String>,
    /// Accepted deviation in percent (defaults to the configured one)
    pub tolerance: Option<f64>,
    /// Output format (table, json)
    pub format: String,
}

/// Print per-code summaries and the issued/target verdict.
///
/// An out-of-tolerance result is reported, not treated as a failure.
pub fn handle_reconcile(args: &ReconcileArgs) -> Result<(), CliError> {
    let format: OutputFormat = args.format.parse().map_err(CliError::InvalidArgument)?;
    let mut config = load_config(&args.workspace)?;
    if let Some(period) = &args.period {
        config.sink.period_key = period.clone();
    }
    // Validates the table names and period key before they reach SQL
    config
        .run_settings()
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;

    let tolerance = args.tolerance.unwrap_or(config.reconcile.tolerance_percent);
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(CliError::InvalidArgument(format!(
            "tolerance must be a non-negative percentage, got {}",
            tolerance
        )));
    }

    let mut store = open_store(&config, &args.workspace)?;
    let report = reconcile(
        store.as_mut(),
        &config.source.table,
        &config.predicate(),
        &config.sink_target(),
        tolerance,
    )?;
    println!("{}", render_reconciliation(&report, format)?);
    Ok(())
}
