//! In-memory [`SchemaStore`] for exercising the runner without Postgres.
//!
//! SQL containing the word `FAIL` errors like a statement the server rejected.
//! Apply and revert yield once before touching state so concurrent runners
//! interleave the way two processes would.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::SchemaStore;
use crate::error::Result;
use crate::ledger::LedgerRecord;
use crate::registry::MigrationDefinition;

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub records: BTreeMap<i64, LedgerRecord>,
    pub executed: Vec<String>,
    pub checksum_writes: usize,
    pub locked: bool,
    pub abandoned_locks: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn seed(&self, version: i64, name: &str, checksum: Option<&str>) {
        self.state().records.insert(
            version,
            LedgerRecord {
                version,
                name: name.to_string(),
                checksum: checksum.map(str::to_string),
                applied_at: Utc::now(),
            },
        );
    }

    pub fn versions(&self) -> Vec<i64> {
        self.state().records.keys().copied().collect()
    }

    pub fn checksum_of(&self, version: i64) -> Option<String> {
        self.state()
            .records
            .get(&version)
            .and_then(|r| r.checksum.clone())
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }
}

fn rejected(sql: &str) -> Option<sqlx::Error> {
    sql.contains("FAIL")
        .then(|| sqlx::Error::Protocol("syntax error at or near \"FAIL\"".into()))
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn ensure_ledger(&self) -> Result<()> {
        Ok(())
    }

    async fn applied(&self) -> Result<BTreeMap<i64, LedgerRecord>> {
        Ok(self.state().records.clone())
    }

    async fn update_checksum(&self, version: i64, checksum: &str) -> Result<()> {
        let mut state = self.state();
        state.checksum_writes += 1;
        if let Some(record) = state.records.get_mut(&version) {
            record.checksum = Some(checksum.to_string());
        }
        Ok(())
    }

    async fn apply(
        &self,
        migration: &MigrationDefinition,
        sql: &str,
        checksum: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        tokio::task::yield_now().await;
        if let Some(error) = rejected(sql) {
            return Err(error);
        }
        let mut state = self.state();
        state.executed.push(sql.to_string());
        state.records.insert(
            migration.version,
            LedgerRecord {
                version: migration.version,
                name: migration.name.clone(),
                checksum: Some(checksum.to_string()),
                applied_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn revert(&self, version: i64, sql: &str) -> std::result::Result<(), sqlx::Error> {
        tokio::task::yield_now().await;
        if let Some(error) = rejected(sql) {
            return Err(error);
        }
        let mut state = self.state();
        state.executed.push(sql.to_string());
        state.records.remove(&version);
        Ok(())
    }

    async fn try_lock(&self) -> Result<bool> {
        let mut state = self.state();
        if state.locked {
            return Ok(false);
        }
        state.locked = true;
        Ok(true)
    }

    async fn unlock(&self) {
        self.state().locked = false;
    }

    fn abandon_lock(&self) {
        let mut state = self.state();
        if state.locked {
            state.locked = false;
            state.abandoned_locks += 1;
        }
    }
}
