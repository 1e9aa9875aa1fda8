//! CLI binary entry point for coupon-bench

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::commands::compare::{CompareArgs, handle_compare};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::commands::init::{InitArgs, handle_init};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::commands::reconcile::{ReconcileArgs, handle_reconcile};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::commands::run::{RunArgs, SettingsOverrides, handle_run};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::commands::seed::{SeedArgs, handle_seed};
#[cfg(feature = "cli")]
use coupon_pipeline::cli::logging;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "coupon-bench")]
#[command(about = "Classify candidates into coupon codes and benchmark write strategies")]
#[command(version)]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(clap::Args, Clone, Debug, Default)]
struct SettingsArgs {
    /// Write mode (per-row, reused-statement, array-batch, server-resident)
    #[arg(short, long)]
    mode: Option<String>,
    /// Commit policy (per-write, every-n, at-end)
    #[arg(short, long)]
    commit: Option<String>,
    /// Rows per commit window for every-n
    #[arg(long)]
    window: Option<usize>,
    /// Rows per array-bound statement
    #[arg(short, long)]
    batch_size: Option<usize>,
    /// Run-period key
    #[arg(short, long)]
    period: Option<String>,
    /// Fetch every candidate and apply the enrollment filter after fetching
    #[arg(long)]
    filter_in_client: bool,
}

#[cfg(feature = "cli")]
impl From<SettingsArgs> for SettingsOverrides {
    fn from(args: SettingsArgs) -> Self {
        SettingsOverrides {
            mode: args.mode,
            commit: args.commit,
            window: args.window,
            batch_size: args.batch_size,
            period: args.period,
            filter_in_client: args.filter_in_client,
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file and create the tables
    Init {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Database backend (duckdb, postgres, memory)
        #[arg(short, long, default_value = "duckdb")]
        backend: String,
        /// PostgreSQL connection string (required for postgres backend)
        #[arg(long)]
        connection_string: Option<String>,
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Append synthetic candidates to the source table
    Seed {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Number of candidates
        #[arg(short = 'n', long, default_value_t = 100_000)]
        count: usize,
    },

    /// Run the pipeline once
    Run {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Load this many synthetic candidates before running
        #[arg(long)]
        seed: Option<usize>,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run every write mode and check they produce the same rows
    Compare {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Load this many synthetic candidates before comparing
        #[arg(long)]
        seed: Option<usize>,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Compare issued coupons against the eligible population
    Reconcile {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Run-period key
        #[arg(short, long)]
        period: Option<String>,
        /// Accepted deviation in percent
        #[arg(short, long)]
        tolerance: Option<f64>,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Init {
            workspace,
            backend,
            connection_string,
            force,
        } => handle_init(&InitArgs {
            workspace,
            backend,
            connection_string,
            force,
        }),
        Commands::Seed { workspace, count } => handle_seed(&SeedArgs { workspace, count }),
        Commands::Run {
            workspace,
            settings,
            seed,
            format,
        } => handle_run(&RunArgs {
            workspace,
            overrides: settings.into(),
            seed,
            format,
        }),
        Commands::Compare {
            workspace,
            settings,
            seed,
            format,
        } => handle_compare(&CompareArgs {
            workspace,
            overrides: settings.into(),
            seed,
            format,
        }),
        Commands::Reconcile {
            workspace,
            period,
            tolerance,
            format,
        } => handle_reconcile(&ReconcileArgs {
            workspace,
            period,
            tolerance,
            format,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
