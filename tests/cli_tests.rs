//! Integration tests for CLI

#![cfg(all(feature = "cli", feature = "duckdb-backend"))]

use coupon_pipeline::cli::commands::compare::{CompareArgs, handle_compare};
use coupon_pipeline::cli::commands::init::{InitArgs, handle_init};
use coupon_pipeline::cli::commands::reconcile::{ReconcileArgs, handle_reconcile};
use coupon_pipeline::cli::commands::run::{RunArgs, SettingsOverrides, handle_run};
use coupon_pipeline::cli::commands::seed::{SeedArgs, handle_seed};
use coupon_pipeline::cli::error::CliError;
use coupon_pipeline::database::config::{CONFIG_FILENAME, DEFAULT_DUCKDB_FILENAME};
use coupon_pipeline::database::{DatabaseBackend, DuckDBBackend, SinkTarget};
use std::path::Path;
use tempfile::TempDir;

fn init(workspace: &Path) {
    handle_init(&InitArgs {
        workspace: workspace.to_path_buf(),
        backend: "duckdb".to_string(),
        connection_string: None,
        force: false,
    })
    .unwrap();
}

fn run_args(workspace: &Path, mode: &str) -> RunArgs {
    RunArgs {
        workspace: workspace.to_path_buf(),
        overrides: SettingsOverrides {
            mode: Some(mode.to_string()),
            ..Default::default()
        },
        seed: None,
        format: "json".to_string(),
    }
}

#[test]
fn test_init_seed_run_reconcile() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path();

    init(workspace);
    assert!(workspace.join(CONFIG_FILENAME).exists());
    assert!(workspace.join(DEFAULT_DUCKDB_FILENAME).exists());

    handle_seed(&SeedArgs {
        workspace: workspace.to_path_buf(),
        count: 300,
    })
    .unwrap();

    handle_run(&run_args(workspace, "array-batch")).unwrap();

    handle_reconcile(&ReconcileArgs {
        workspace: workspace.to_path_buf(),
        period: None,
        tolerance: None,
        format: "table".to_string(),
    })
    .unwrap();

    let mut store = DuckDBBackend::new(workspace.join(DEFAULT_DUCKDB_FILENAME)).unwrap();
    assert!(
        store
            .count_sink(&SinkTarget::new("bonus_coupon", "202506"))
            .unwrap()
            > 200
    );
}

#[test]
fn test_compare_on_seeded_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path();
    init(workspace);

    let result = handle_compare(&CompareArgs {
        workspace: workspace.to_path_buf(),
        overrides: SettingsOverrides {
            batch_size: Some(50),
            window: Some(120),
            ..Default::default()
        },
        seed: Some(250),
        format: "table".to_string(),
    });
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_run_rejects_bad_arguments() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path();
    init(workspace);

    let result = handle_run(&run_args(workspace, "bulk-copy"));
    assert!(matches!(result, Err(CliError::InvalidArgument(_))));

    let mut args = run_args(workspace, "per-row");
    args.format = "xml".to_string();
    assert!(matches!(handle_run(&args), Err(CliError::InvalidArgument(_))));
}

#[test]
fn test_commands_need_a_workspace() {
    let result = handle_seed(&SeedArgs {
        workspace: Path::new("/nonexistent/coupon-bench").to_path_buf(),
        count: 10,
    });
    assert!(matches!(result, Err(CliError::WorkspaceNotFound(_))));
}
