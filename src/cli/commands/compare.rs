//! Cross-strategy comparison command

use std::path::PathBuf;

use crate::cli::commands::run::SettingsOverrides;
use crate::cli::commands::{load_config, open_store, prepare_store};
use crate::cli::error::CliError;
use crate::cli::report::{OutputFormat, render_comparison, render_run};
use crate::pipeline::compare_strategies;

/// Compare command arguments
#[derive(Debug, Clone)]
pub struct CompareArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Setting overrides; the write mode is ignored
    pub overrides: SettingsOverrides,
    /// Load this many synthetic candidates first
    pub seed: Option<usize>,
    /// Output format (table, json)
    pub format: String,
}

/// Run every write mode and fail when their sink rows differ.
pub fn handle_compare(args: &CompareArgs) -> Result<(), CliError> {
    let format: OutputFormat = args.format.parse().map_err(CliError::InvalidArgument)?;
    let config = load_config(&args.workspace)?;
    let settings = args.overrides.apply(&config)?;

    let mut store = open_store(&config, &args.workspace)?;
    prepare_store(store.as_mut(), &config, args.seed)?;

    let comparison = match compare_strategies(store.as_mut(), &settings) {
        Ok(comparison) => comparison,
        Err(e) => {
            if let Some(report) = e.partial_report() {
                println!("{}", render_run(&report, format)?);
            }
            return Err(e.into());
        }
    };
    println!("{}", render_comparison(&comparison, format)?);

    if comparison.is_equivalent() {
        Ok(())
    } else {
        let modes: Vec<String> = comparison.mismatched.iter().map(|m| m.to_string()).collect();
        Err(CliError::StrategiesDisagree(modes.join(", ")))
    }
}
