//! CLI command implementations

pub mod compare;
pub mod init;
pub mod reconcile;
pub mod run;
pub mod seed;

use std::path::Path;

use tracing::info;

use crate::cli::error::CliError;
use crate::database::config::{DatabaseBackendType, PipelineConfig};
use crate::database::{DatabaseBackend, MemoryBackend};
use crate::seed::synthetic_candidates;

/// Load the workspace configuration, with environment overrides applied.
pub fn load_config(workspace: &Path) -> Result<PipelineConfig, CliError> {
    if !workspace.is_dir() {
        return Err(CliError::WorkspaceNotFound(workspace.to_path_buf()));
    }
    Ok(PipelineConfig::load(workspace)?)
}

/// Open the configured store.
pub fn open_store(
    config: &PipelineConfig,
    workspace: &Path,
) -> Result<Box<dyn DatabaseBackend>, CliError> {
    let store: Box<dyn DatabaseBackend> = match config.database.backend {
        DatabaseBackendType::DuckDB => open_duckdb(config, workspace)?,
        DatabaseBackendType::Postgres => open_postgres(config)?,
        DatabaseBackendType::Memory => Box::new(MemoryBackend::new()),
    };
    info!(backend = store.backend_type(), "Store opened");
    Ok(store)
}

#[cfg(feature = "duckdb-backend")]
fn open_duckdb(
    config: &PipelineConfig,
    workspace: &Path,
) -> Result<Box<dyn DatabaseBackend>, CliError> {
    let path = config.get_duckdb_path(workspace);
    Ok(Box::new(crate::database::DuckDBBackend::new(&path)?))
}

#[cfg(not(feature = "duckdb-backend"))]
fn open_duckdb(
    _config: &PipelineConfig,
    _workspace: &Path,
) -> Result<Box<dyn DatabaseBackend>, CliError> {
    Err(CliError::BackendUnavailable(
        "DuckDB support not enabled. Enable 'duckdb-backend' feature.".to_string(),
    ))
}

#[cfg(feature = "postgres-backend")]
fn open_postgres(config: &PipelineConfig) -> Result<Box<dyn DatabaseBackend>, CliError> {
    let connection_string = config.get_postgres_connection_string().ok_or_else(|| {
        CliError::InvalidArgument(
            "PostgreSQL backend requires [postgres] connection_string".to_string(),
        )
    })?;
    let backend = crate::database::PostgresBackend::new(connection_string)?;
    info!(
        connection = %backend.connection_string_masked(),
        "Connected to PostgreSQL"
    );
    Ok(Box::new(backend))
}

#[cfg(not(feature = "postgres-backend"))]
fn open_postgres(_config: &PipelineConfig) -> Result<Box<dyn DatabaseBackend>, CliError> {
    Err(CliError::BackendUnavailable(
        "PostgreSQL support not enabled. Enable 'postgres-backend' feature.".to_string(),
    ))
}

/// Create the tables and optionally load synthetic candidates.
///
/// # Returns
/// Number of candidates loaded
pub fn prepare_store(
    store: &mut dyn DatabaseBackend,
    config: &PipelineConfig,
    seed: Option<usize>,
) -> Result<usize, CliError> {
    store.initialize(&config.source.table, &config.sink.table)?;

    let Some(count) = seed else {
        return Ok(0);
    };
    let loaded = store.load_candidates(&config.source.table, &synthetic_candidates(count))?;
    info!(loaded, table = %config.source.table, "Synthetic candidates loaded");
    Ok(loaded)
}
