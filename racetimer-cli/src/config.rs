//! Connection and environment settings shared by every subcommand
//!
//! Everything can come from flags or environment variables; `.env` in the
//! working directory is loaded before parsing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::Args;
use racetimer_db::{Database, DbConfig};
use racetimer_migrate::{EnvironmentGuard, MigrationRegistry, MigrationRunner, PgSchemaStore};

pub const DEFAULT_MIGRATIONS_DIR: &str = "../database/schema/migrations";

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Directory holding NNNN_name.sql migration files
    #[arg(
        long,
        env = "MIGRATIONS_DIR",
        value_name = "DIR",
        default_value = DEFAULT_MIGRATIONS_DIR,
        global = true
    )]
    pub migrations_dir: PathBuf,

    #[command(flatten)]
    pub database: DatabaseArgs,

    #[command(flatten)]
    pub guard: GuardArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Database URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    /// Maximum pool connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// application_name reported to the server
    #[arg(long, env = "DB_APPLICATION_NAME", default_value = "easy-race-timer", global = true)]
    pub application_name: String,

    /// statement_timeout in milliseconds
    #[arg(long, env = "DB_STATEMENT_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub statement_timeout_ms: u64,

    /// idle_in_transaction_session_timeout in milliseconds
    #[arg(long, env = "DB_IDLE_TXN_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    pub idle_txn_timeout_ms: u64,

    /// lock_timeout in milliseconds
    #[arg(long, env = "DB_LOCK_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub lock_timeout_ms: u64,
}

impl DatabaseArgs {
    pub fn to_config(&self) -> Result<DbConfig> {
        let url = self
            .database_url
            .clone()
            .context("DATABASE_URL not set. Set via --database-url, DATABASE_URL env, or .env")?;

        let mut config = DbConfig::new(url);
        config.max_connections = self.max_connections;
        config.application_name = self.application_name.clone();
        config.statement_timeout_ms = self.statement_timeout_ms;
        config.idle_in_transaction_timeout_ms = self.idle_txn_timeout_ms;
        config.lock_timeout_ms = self.lock_timeout_ms;
        config.validate().context("Invalid database settings")?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct GuardArgs {
    /// Deployment environment; `production` guards rebaseline and down
    /// (falls back to NODE_ENV)
    #[arg(long = "env", env = "MIGRATION_ENV", value_name = "NAME", global = true)]
    pub environment: Option<String>,

    /// Allow rebaseline and down in production (env accepts 1/0, true/false, yes/no)
    #[arg(
        long,
        env = "MIGRATION_FORCE",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub force: bool,
}

impl GuardArgs {
    pub fn guard(&self) -> EnvironmentGuard {
        let environment = self
            .environment
            .clone()
            .or_else(|| std::env::var("NODE_ENV").ok());
        EnvironmentGuard::from_environment(environment.as_deref(), self.force)
    }
}

impl MigrateArgs {
    pub fn registry(&self) -> MigrationRegistry {
        MigrationRegistry::new(self.migrations_dir.clone())
    }

    /// Build a runner over a lazily connected pool.
    ///
    /// The caller owns the returned [`Database`] and must shut it down once the
    /// runner is done.
    pub fn runner(&self) -> Result<(Database, MigrationRunner<PgSchemaStore>)> {
        let config = self.database.to_config()?;
        let db = Database::connect_lazy(&config).context("Failed to create database pool")?;
        let store = PgSchemaStore::new(db.pool().clone());
        let runner = MigrationRunner::new(self.registry(), store, self.guard.guard());
        Ok((db, runner))
    }
}
