//! The `schema_migrations` ledger
//!
//! One row per applied migration. A row's presence means "applied"; its
//! `checksum` may be NULL for rows written before checksums were tracked.
//! The timestamp column is `run_at` on disk (kept for existing deployments)
//! and surfaces as `applied_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LedgerRecord {
    pub version: i64,
    pub name: String,
    pub checksum: Option<String>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChecksumLedger {
    pool: PgPool,
}

impl ChecksumLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger table, or add the checksum column to a ledger that
    /// predates it. Safe to call on every run.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id BIGSERIAL PRIMARY KEY,
                version BIGINT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT,
                run_at TIMESTAMPTZ DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("ALTER TABLE schema_migrations ADD COLUMN IF NOT EXISTS checksum TEXT")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn all_applied(&self) -> Result<BTreeMap<i64, LedgerRecord>, sqlx::Error> {
        // run_at is nullable in ledgers created by older tooling
        let rows = sqlx::query_as::<_, LedgerRecord>(
            r#"
            SELECT version, name, checksum, COALESCE(run_at, to_timestamp(0)) AS applied_at
            FROM schema_migrations
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.version, r)).collect())
    }

    /// Insert a ledger row on the caller's transaction.
    pub async fn record_applied(
        conn: &mut PgConnection,
        version: i64,
        name: &str,
        checksum: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES ($1, $2, $3)")
            .bind(version)
            .bind(name)
            .bind(checksum)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete a ledger row on the caller's transaction.
    pub async fn remove_applied(conn: &mut PgConnection, version: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
            .bind(version)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn update_checksum(&self, version: i64, checksum: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE schema_migrations SET checksum = $1 WHERE version = $2")
            .bind(checksum)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
