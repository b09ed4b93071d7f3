//! racetimer-migrate: versioned SQL migrations for the race timer database
//!
//! Migrations are plain SQL files in a directory (`0001_init.sql`, with an
//! optional `0001_init.down.sql`). Applied migrations are recorded in the
//! `schema_migrations` ledger together with a SHA-256 checksum of the file, so
//! later edits to an applied file show up as drift. Mutating runs are
//! serialized across processes with a Postgres advisory lock.

pub mod checksum;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod lock;
pub mod registry;
pub mod report;
pub mod runner;
pub mod store;

pub use error::{MigrateError, Result};
pub use guard::EnvironmentGuard;
pub use ledger::{ChecksumLedger, LedgerRecord};
pub use lock::LockCoordinator;
pub use registry::{CreatedMigration, MigrationDefinition, MigrationRegistry};
pub use report::{
    BackfillReport, CheckReport, DownReport, MigrationRef, MigrationState, RebaselineReport,
    StatusEntry, StatusReport, UpReport,
};
pub use runner::MigrationRunner;
pub use store::{PgSchemaStore, SchemaStore};

/// Runner over the production Postgres store.
pub type PgMigrationRunner = MigrationRunner<PgSchemaStore>;
