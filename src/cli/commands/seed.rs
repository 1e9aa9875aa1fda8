//! Synthetic data command

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_store, prepare_store};
use crate::cli::error::CliError;

/// Seed command arguments
#[derive(Debug, Clone)]
pub struct SeedArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Number of candidates to generate
    pub count: usize,
}

/// Append deterministic synthetic candidates to the source table.
pub fn handle_seed(args: &SeedArgs) -> Result<(), CliError> {
    if args.count == 0 {
        return Err(CliError::InvalidArgument(
            "--count must be at least 1".to_string(),
        ));
    }

    let config = load_config(&args.workspace)?;
    let mut store = open_store(&config, &args.workspace)?;
    let loaded = prepare_store(store.as_mut(), &config, Some(args.count))?;

    let eligible = store.count_eligible(&config.source.table, &config.predicate())?;
    println!(
        "Loaded {} candidates into {} ({} eligible in total)",
        loaded, config.source.table, eligible
    );
    Ok(())
}
