//! CLI-specific error types

use crate::database::DatabaseError;
use crate::pipeline::PipelineError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(PathBuf),

    #[error("Configuration already exists in {0}. Use --force to overwrite.")]
    AlreadyInitialized(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Strategies disagree: {0}")]
    StrategiesDisagree(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}
