//! `status` and `check`: read-only views of the ledger against the files

use anyhow::Result;
use clap::Parser;
use racetimer_migrate::{MigrateError, MigrationState, PgMigrationRunner, StatusReport};

#[derive(Parser, Debug, Default)]
pub struct ReportArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run_status(runner: &PgMigrationRunner, args: ReportArgs) -> Result<()> {
    let report = runner.status().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

pub async fn run_check(runner: &PgMigrationRunner, args: ReportArgs) -> Result<()> {
    match runner.check().await {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("MIGRATION CHECK: {report}");
            }
            Ok(())
        }
        Err(MigrateError::CheckFailed(report)) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(MigrateError::CheckFailed(report).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    for entry in &report.entries {
        let line = match &entry.state {
            MigrationState::Pending => format!("  {} {}", entry.version, entry.name),
            MigrationState::Clean => format!("X {} {}", entry.version, entry.name),
            MigrationState::Drift { .. } => format!("X {} {} (DRIFT!)", entry.version, entry.name),
            MigrationState::NoChecksum => format!(
                "X {} {} (NO CHECKSUM - run: racetimer-migrate backfill)",
                entry.version, entry.name
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    for record in &report.orphaned {
        out.push_str(&format!("? {} {} (no file)\n", record.version, record.name));
    }
    out
}
