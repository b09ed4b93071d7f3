//! `up` and `down`: the commands that change the schema

use anyhow::Result;
use clap::Parser;
use racetimer_migrate::{DownReport, PgMigrationRunner, UpReport};

#[derive(Parser, Debug)]
pub struct DownArgs {
    /// Number of most recent migrations to roll back
    #[arg(default_value_t = 1)]
    pub count: usize,
}

pub async fn run_up(runner: &PgMigrationRunner) -> Result<()> {
    let report = runner.up().await?;
    print_up(&report);
    Ok(())
}

pub async fn run_down(runner: &PgMigrationRunner, args: DownArgs) -> Result<()> {
    let report = runner.down(args.count).await?;
    print_down(&report);
    Ok(())
}

fn print_up(report: &UpReport) {
    if report.applied.is_empty() {
        println!("Database is up to date.");
        return;
    }
    for migration in &report.applied {
        println!(
            "✓ Applied {} {} ({}ms)",
            migration.version, migration.name, migration.elapsed_ms
        );
    }
    println!(
        "All migrations complete in {}ms ({} applied)",
        report.elapsed_ms,
        report.applied.len()
    );
}

fn print_down(report: &DownReport) {
    if report.rolled_back.is_empty() {
        println!("No applied migrations to roll back.");
        return;
    }
    for migration in &report.rolled_back {
        println!("✓ Rolled back {migration}");
    }
}
