//! `backfill` and `rebaseline`: ledger checksum maintenance

use anyhow::Result;
use racetimer_migrate::PgMigrationRunner;

pub async fn run_backfill(runner: &PgMigrationRunner) -> Result<()> {
    let report = runner.backfill().await?;

    if report.is_noop() {
        println!("No checksum backfill needed.");
        return Ok(());
    }
    for migration in &report.filled {
        println!("✓ Backfilled checksum for {migration}");
    }
    for migration in &report.skipped {
        println!("! Skipped {migration} (migration file not found)");
    }
    if !report.filled.is_empty() {
        println!("NOTE: backfilled checksums trust the files as they are now.");
    }
    Ok(())
}

pub async fn run_rebaseline(runner: &PgMigrationRunner) -> Result<()> {
    let report = runner.rebaseline().await?;

    if report.rewritten.is_empty() {
        println!(
            "No drifted migrations to rebaseline ({} already match).",
            report.unchanged.len()
        );
        return Ok(());
    }
    for migration in &report.rewritten {
        println!("✓ Rebaselined {migration}");
    }
    println!("NOTE: rebaseline accepts the current files as applied; it does not re-run them.");
    Ok(())
}
