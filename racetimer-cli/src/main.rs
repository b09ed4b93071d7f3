//! racetimer-migrate - schema migrations for the Easy Race Timer database
//!
//! Applies the numbered SQL files in the migrations directory, tracks their
//! checksums in `schema_migrations`, and serializes runs with an advisory lock.
//!
//! Exit codes:
//!   0   success
//!   1   any other failure
//!   2   another migration run holds the lock
//!   3   refused in production without MIGRATION_FORCE=1
//!   10  `check` found pending, drifted, or unchecksummed migrations

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use racetimer_migrate::MigrateError;

mod commands;
mod config;
mod tracing_setup;

use config::MigrateArgs;
use tracing_setup::TracingConfig;

const EXIT_FAILURE: u8 = 1;
const EXIT_LOCK_UNAVAILABLE: u8 = 2;
const EXIT_GUARD_REFUSED: u8 = 3;
const EXIT_CHECK_FAILED: u8 = 10;

#[derive(Parser, Debug)]
#[command(
    name = "racetimer-migrate",
    author,
    version,
    about = "Versioned SQL migrations with checksum drift detection",
    long_about = "Apply, inspect, and roll back the numbered SQL migrations of the race timer \
                  database. Runs with no subcommand are equivalent to `up`."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(flatten)]
    args: MigrateArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations (default)
    Up,
    /// Show every migration with its applied/drift state
    Status(commands::ReportArgs),
    /// Record checksums for applied migrations that have none
    Backfill,
    /// Overwrite stored checksums with those of the current files
    Rebaseline,
    /// Create the next migration and its reverse template
    New(commands::NewArgs),
    /// Roll back the most recent applied migrations
    Down(commands::DownArgs),
    /// Fail if anything is pending, drifted, or missing a checksum
    Check(commands::ReportArgs),
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Up) {
        // Scaffolding only touches the filesystem
        Commands::New(args) => commands::run_new(&cli.args.registry(), args),
        command => run_against_database(&cli.args, command).await,
    }
}

async fn run_against_database(args: &MigrateArgs, command: Commands) -> Result<()> {
    let (db, runner) = args.runner()?;
    let outcome = match command {
        Commands::Up => commands::run_up(&runner).await,
        Commands::Status(args) => commands::run_status(&runner, args).await,
        Commands::Backfill => commands::run_backfill(&runner).await,
        Commands::Rebaseline => commands::run_rebaseline(&runner).await,
        Commands::Down(args) => commands::run_down(&runner, args).await,
        Commands::Check(args) => commands::run_check(&runner, args).await,
        Commands::New(args) => commands::run_new(runner.registry(), args),
    };

    drop(runner);
    db.shutdown().await;
    outcome
}

/// Help and version output succeed; every other usage error is a generic failure.
fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        EXIT_FAILURE
    } else {
        0
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrateError>() {
        Some(MigrateError::LockUnavailable) => EXIT_LOCK_UNAVAILABLE,
        Some(MigrateError::GuardRefused { .. }) => EXIT_GUARD_REFUSED,
        Some(MigrateError::CheckFailed(_)) => EXIT_CHECK_FAILED,
        _ => EXIT_FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Exit 2 is reserved for lock contention
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };

    let tracing_config = TracingConfig { debug: cli.debug };
    if let Err(err) = tracing_setup::init(&tracing_config) {
        eprintln!("Warning: failed to initialize tracing: {err}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
