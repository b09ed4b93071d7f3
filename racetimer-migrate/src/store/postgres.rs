use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Transaction};

use super::SchemaStore;
use crate::error::Result;
use crate::ledger::{ChecksumLedger, LedgerRecord};
use crate::lock::LockCoordinator;
use crate::registry::MigrationDefinition;

/// [`SchemaStore`] backed by a Postgres pool.
#[derive(Debug)]
pub struct PgSchemaStore {
    pool: PgPool,
    ledger: ChecksumLedger,
    lock: LockCoordinator,
}

impl PgSchemaStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: ChecksumLedger::new(pool.clone()),
            lock: LockCoordinator::new(pool.clone()),
            pool,
        }
    }

    pub fn with_lock(pool: PgPool, lock: LockCoordinator) -> Self {
        Self {
            ledger: ChecksumLedger::new(pool.clone()),
            lock,
            pool,
        }
    }

    pub fn ledger(&self) -> &ChecksumLedger {
        &self.ledger
    }
}

async fn forward(
    conn: &mut PgConnection,
    migration: &MigrationDefinition,
    sql: &str,
    checksum: &str,
) -> std::result::Result<(), sqlx::Error> {
    // No bind arguments: simple-query protocol, so multi-statement bodies run as-is
    Executor::execute(&mut *conn, sql).await?;
    ChecksumLedger::record_applied(conn, migration.version, &migration.name, checksum).await
}

async fn reverse(
    conn: &mut PgConnection,
    version: i64,
    sql: &str,
) -> std::result::Result<(), sqlx::Error> {
    Executor::execute(&mut *conn, sql).await?;
    ChecksumLedger::remove_applied(conn, version).await
}

async fn finish(
    tx: Transaction<'static, Postgres>,
    outcome: std::result::Result<(), sqlx::Error>,
) -> std::result::Result<(), sqlx::Error> {
    match outcome {
        Ok(()) => tx.commit().await,
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(error = %rollback_error, "rollback after failed migration also failed");
            }
            Err(error)
        }
    }
}

#[async_trait]
impl SchemaStore for PgSchemaStore {
    async fn ensure_ledger(&self) -> Result<()> {
        self.ledger.ensure_schema().await?;
        Ok(())
    }

    async fn applied(&self) -> Result<BTreeMap<i64, LedgerRecord>> {
        Ok(self.ledger.all_applied().await?)
    }

    async fn update_checksum(&self, version: i64, checksum: &str) -> Result<()> {
        self.ledger.update_checksum(version, checksum).await?;
        Ok(())
    }

    async fn apply(
        &self,
        migration: &MigrationDefinition,
        sql: &str,
        checksum: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let outcome = forward(&mut tx, migration, sql, checksum).await;
        finish(tx, outcome).await
    }

    async fn revert(&self, version: i64, sql: &str) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let outcome = reverse(&mut tx, version, sql).await;
        finish(tx, outcome).await
    }

    async fn try_lock(&self) -> Result<bool> {
        Ok(self.lock.try_acquire().await?)
    }

    async fn unlock(&self) {
        self.lock.release().await;
    }

    fn abandon_lock(&self) {
        self.lock.abandon();
    }
}
