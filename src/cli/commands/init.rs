//! Workspace initialization command

use std::path::PathBuf;

use crate::cli::commands::{open_store, prepare_store};
use crate::cli::error::CliError;
use crate::database::config::{DEFAULT_DUCKDB_FILENAME, DatabaseBackendType, PipelineConfig};

/// Init command arguments
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Database backend (duckdb, postgres, memory)
    pub backend: String,
    /// PostgreSQL connection string
    pub connection_string: Option<String>,
    /// Overwrite an existing configuration
    pub force: bool,
}

/// Write `.coupon-bench.toml` and create the tables.
pub fn handle_init(args: &InitArgs) -> Result<(), CliError> {
    let workspace_path = &args.workspace;

    if !workspace_path.exists() {
        std::fs::create_dir_all(workspace_path)
            .map_err(|e| CliError::IoError(format!("Failed to create workspace: {}", e)))?;
    }

    if PipelineConfig::exists(workspace_path) && !args.force {
        return Err(CliError::AlreadyInitialized(workspace_path.clone()));
    }

    let backend: DatabaseBackendType = args
        .backend
        .parse()
        .map_err(CliError::InvalidArgument)?;

    let config = match backend {
        DatabaseBackendType::Postgres => {
            let connection_string = args.connection_string.as_deref().ok_or_else(|| {
                CliError::InvalidArgument(
                    "--connection-string is required for the postgres backend".to_string(),
                )
            })?;
            PipelineConfig::postgres(connection_string)
        }
        DatabaseBackendType::DuckDB => PipelineConfig::duckdb(DEFAULT_DUCKDB_FILENAME),
        DatabaseBackendType::Memory => PipelineConfig::memory(),
    };

    config.save(workspace_path)?;
    println!(
        "Wrote {}",
        workspace_path
            .join(crate::database::config::CONFIG_FILENAME)
            .display()
    );

    if backend == DatabaseBackendType::Memory {
        println!("Memory backend keeps nothing between commands; pass --seed to run/compare");
        return Ok(());
    }

    let mut store = open_store(&config, workspace_path)?;
    prepare_store(store.as_mut(), &config, None)?;
    println!(
        "Initialized tables {} and {} ({})",
        config.source.table,
        config.sink.table,
        store.backend_type()
    );
    Ok(())
}
