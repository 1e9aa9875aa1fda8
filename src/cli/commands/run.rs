//! Benchmark run command

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_store, prepare_store};
use crate::cli::error::CliError;
use crate::cli::report::{OutputFormat, render_run_result};
use crate::database::config::PipelineConfig;
use crate::pipeline::{CommitSchedule, Pipeline, RunSettings};

/// Overrides applied on top of the workspace configuration
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    /// Write mode (per-row, reused-statement, array-batch, server-resident)
    pub mode: Option<String>,
    /// Commit policy (per-write, every-n, at-end)
    pub commit: Option<String>,
    /// Rows per commit window
    pub window: Option<usize>,
    /// Rows per array-bound statement
    pub batch_size: Option<usize>,
    /// Run-period key
    pub period: Option<String>,
    /// Fetch unfiltered and filter after fetching
    pub filter_in_client: bool,
}

impl SettingsOverrides {
    /// Merge into the configuration and validate the result.
    pub fn apply(&self, config: &PipelineConfig) -> Result<RunSettings, CliError> {
        let mut config = config.clone();

        if let Some(mode) = &self.mode {
            config.write.mode = mode.parse().map_err(CliError::InvalidArgument)?;
        }
        if let Some(commit) = &self.commit {
            config.commit.policy = commit
                .parse::<CommitSchedule>()
                .map_err(CliError::InvalidArgument)?;
        }
        if let Some(window) = self.window {
            config.commit.window = window;
        }
        if let Some(batch_size) = self.batch_size {
            config.write.batch_size = batch_size;
        }
        if let Some(period) = &self.period {
            config.sink.period_key = period.clone();
        }
        if self.filter_in_client {
            config.source.filter_at_source = false;
        }

        config
            .run_settings()
            .map_err(|e| CliError::InvalidArgument(e.to_string()))
    }
}

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Setting overrides
    pub overrides: SettingsOverrides,
    /// Load this many synthetic candidates first
    pub seed: Option<usize>,
    /// Output format (table, json)
    pub format: String,
}

/// Execute one run and print its report.
pub fn handle_run(args: &RunArgs) -> Result<(), CliError> {
    let format: OutputFormat = args.format.parse().map_err(CliError::InvalidArgument)?;
    let config = load_config(&args.workspace)?;
    let settings = args.overrides.apply(&config)?;

    let mut store = open_store(&config, &args.workspace)?;
    prepare_store(store.as_mut(), &config, args.seed)?;

    let result = Pipeline::new(settings)?.run(store.as_mut());
    if let Some(output) = render_run_result(&result, format)? {
        println!("{}", output);
    }
    result?;
    Ok(())
}
