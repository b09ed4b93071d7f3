//! Persistence seam between the runner and the database
//!
//! The runner only talks to a [`SchemaStore`]: ledger reads and writes, the
//! transactional apply/revert of one migration, and the run lock. Postgres is
//! the production implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::LedgerRecord;
use crate::registry::MigrationDefinition;

#[cfg(test)]
pub(crate) mod memory;
pub mod postgres;

pub use postgres::PgSchemaStore;

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Create or upgrade the ledger.
    async fn ensure_ledger(&self) -> Result<()>;

    /// Every ledger record keyed by version.
    async fn applied(&self) -> Result<BTreeMap<i64, LedgerRecord>>;

    /// Overwrite one record's checksum outside any migration transaction.
    async fn update_checksum(&self, version: i64, checksum: &str) -> Result<()>;

    /// Run `sql` and record the migration in one transaction. On error the
    /// transaction is rolled back and nothing is recorded.
    async fn apply(
        &self,
        migration: &MigrationDefinition,
        sql: &str,
        checksum: &str,
    ) -> std::result::Result<(), sqlx::Error>;

    /// Run reverse `sql` and delete the ledger record in one transaction.
    async fn revert(&self, version: i64, sql: &str) -> std::result::Result<(), sqlx::Error>;

    /// Non-blocking attempt at the run lock.
    async fn try_lock(&self) -> Result<bool>;

    /// Release the run lock. Never fails.
    async fn unlock(&self);

    /// Drop the run lock without awaiting, for runs that ended before
    /// [`SchemaStore::unlock`] completed.
    fn abandon_lock(&self);
}
