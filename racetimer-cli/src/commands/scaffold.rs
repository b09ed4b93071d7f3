//! `new`: write the next forward/reverse migration pair

use anyhow::Result;
use clap::Parser;
use racetimer_migrate::MigrationRegistry;

#[derive(Parser, Debug)]
pub struct NewArgs {
    /// Migration name; multiple words are joined with underscores
    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,
}

/// Runs without a database connection.
pub fn run_new(registry: &MigrationRegistry, args: NewArgs) -> Result<()> {
    let created = registry.create(&args.name.join("_"))?;

    println!("Created migration {}", created.forward.display());
    println!("  ↳ reverse {}", created.reverse.display());
    Ok(())
}
