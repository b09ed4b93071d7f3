//! Migration lifecycle orchestration
//!
//! Per migration, `up` drives `pending -> applying -> applied | failed` and
//! `down` drives `applied -> rolling_back -> rolled_back | aborted`. Both run
//! one migration at a time, each in its own transaction, and stop at the
//! first failure. `up`, `down` and `rebaseline` hold the advisory lock for
//! the whole run; `status`, `check` and `backfill` take no lock.

use std::fs;
use std::future::Future;
use std::time::Instant;

use crate::checksum::checksum;
use crate::error::{MigrateError, Result};
use crate::guard::EnvironmentGuard;
use crate::ledger::LedgerRecord;
use crate::registry::{CreatedMigration, MigrationRegistry};
use crate::report::{
    AppliedMigration, BackfillReport, CheckReport, DownReport, MigrationRef, MigrationState,
    RebaselineReport, StatusEntry, StatusReport, UpReport,
};
use crate::store::SchemaStore;

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Abandons the run lock if a locked run is dropped before it unlocks.
/// After a normal unlock, abandoning is a no-op.
struct LockGuard<'a, S: SchemaStore> {
    store: &'a S,
}

impl<S: SchemaStore> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        self.store.abandon_lock();
    }
}

pub struct MigrationRunner<S> {
    registry: MigrationRegistry,
    store: S,
    guard: EnvironmentGuard,
}

impl<S: SchemaStore> MigrationRunner<S> {
    pub fn new(registry: MigrationRegistry, store: S, guard: EnvironmentGuard) -> Self {
        Self {
            registry,
            store,
            guard,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `op` while holding the advisory lock. The lock is released whether
    /// `op` succeeds or fails.
    async fn locked<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.store.try_lock().await? {
            return Err(MigrateError::LockUnavailable);
        }
        let _guard = LockGuard { store: &self.store };
        let outcome = op().await;
        self.store.unlock().await;
        outcome
    }

    /// Apply every pending migration in version order.
    pub async fn up(&self) -> Result<UpReport> {
        self.store.ensure_ledger().await?;

        let backfilled = self.backfill().await?;
        if !backfilled.filled.is_empty() {
            tracing::debug!(count = backfilled.filled.len(), "backfilled legacy checksums");
        }

        self.locked(|| self.apply_pending()).await
    }

    async fn apply_pending(&self) -> Result<UpReport> {
        let started = Instant::now();
        let migrations = self.registry.list()?;
        let applied = self.store.applied().await?;
        let mut report = UpReport::default();

        for migration in migrations
            .iter()
            .filter(|m| !applied.contains_key(&m.version))
        {
            let sql = migration.read_forward()?;
            let checksum = checksum(sql.as_bytes());

            tracing::info!(version = migration.version, name = %migration.name, "applying migration");
            let t0 = Instant::now();

            if let Err(source) = self.store.apply(migration, &sql, &checksum).await {
                tracing::error!(
                    version = migration.version,
                    name = %migration.name,
                    error = %source,
                    "migration failed"
                );
                return Err(MigrateError::ApplyFailed {
                    version: migration.version,
                    name: migration.name.clone(),
                    source,
                });
            }

            let elapsed_ms = elapsed_ms(t0);
            tracing::info!(version = migration.version, elapsed_ms, "applied migration");
            report.applied.push(AppliedMigration {
                version: migration.version,
                name: migration.name.clone(),
                elapsed_ms,
            });
        }

        report.elapsed_ms = elapsed_ms(started);
        tracing::info!(
            applied = report.applied.len(),
            elapsed_ms = report.elapsed_ms,
            "all migrations complete"
        );
        Ok(report)
    }

    /// Compare every migration file against the ledger.
    pub async fn status(&self) -> Result<StatusReport> {
        self.store.ensure_ledger().await?;
        let migrations = self.registry.list()?;
        let mut applied = self.store.applied().await?;

        let mut entries = Vec::with_capacity(migrations.len());
        for migration in &migrations {
            let state = match applied.remove(&migration.version) {
                None => MigrationState::Pending,
                Some(LedgerRecord { checksum: None, .. }) => MigrationState::NoChecksum,
                Some(LedgerRecord {
                    checksum: Some(recorded),
                    ..
                }) => {
                    let current = migration.current_checksum()?;
                    if recorded == current {
                        MigrationState::Clean
                    } else {
                        MigrationState::Drift { recorded, current }
                    }
                }
            };
            entries.push(StatusEntry {
                version: migration.version,
                name: migration.name.clone(),
                state,
            });
        }

        Ok(StatusReport {
            entries,
            orphaned: applied.into_values().collect(),
        })
    }

    /// CI gate: succeeds only with nothing pending, drifted, or missing a
    /// checksum.
    pub async fn check(&self) -> Result<CheckReport> {
        let summary = self.status().await?.summary();
        if summary.is_clean() {
            Ok(summary)
        } else {
            Err(MigrateError::CheckFailed(summary))
        }
    }

    /// Fill in checksums for ledger rows written before checksums existed.
    /// Rows whose file is gone are reported and skipped.
    pub async fn backfill(&self) -> Result<BackfillReport> {
        self.store.ensure_ledger().await?;
        let legacy: Vec<LedgerRecord> = self
            .store
            .applied()
            .await?
            .into_values()
            .filter(|r| r.checksum.is_none())
            .collect();

        let mut report = BackfillReport::default();
        if legacy.is_empty() {
            return Ok(report);
        }

        let migrations = self.registry.list()?;
        for record in legacy {
            let Some(migration) = migrations.iter().find(|m| m.version == record.version) else {
                tracing::warn!(
                    version = record.version,
                    name = %record.name,
                    "could not find migration file, skipping checksum backfill"
                );
                report.skipped.push(MigrationRef::new(record.version, record.name));
                continue;
            };

            let current = migration.current_checksum()?;
            self.store.update_checksum(record.version, &current).await?;
            tracing::debug!(version = record.version, "backfilled checksum");
            report.filled.push(MigrationRef::new(record.version, record.name));
        }

        Ok(report)
    }

    /// Accept current file contents as truth for every applied migration.
    /// Drift history before this point is gone afterwards.
    pub async fn rebaseline(&self) -> Result<RebaselineReport> {
        self.guard.check("rebaseline")?;
        self.store.ensure_ledger().await?;
        self.locked(|| self.rewrite_checksums()).await
    }

    async fn rewrite_checksums(&self) -> Result<RebaselineReport> {
        let applied = self.store.applied().await?;
        let mut report = RebaselineReport::default();

        for migration in self.registry.list()? {
            let Some(record) = applied.get(&migration.version) else {
                continue;
            };
            let current = migration.current_checksum()?;
            self.store.update_checksum(migration.version, &current).await?;

            let entry = MigrationRef::new(migration.version, migration.name);
            if record.checksum.as_deref() == Some(current.as_str()) {
                report.unchanged.push(entry);
            } else {
                tracing::info!(
                    version = entry.version,
                    previous = record.checksum.as_deref().unwrap_or("none"),
                    "rebaselined checksum"
                );
                report.rewritten.push(entry);
            }
        }

        Ok(report)
    }

    /// Reverse the `count` most recently applied migrations, newest first.
    ///
    /// Stops at the first migration without a down file or whose down SQL
    /// fails. Reversals completed earlier in the same call stay reversed.
    pub async fn down(&self, count: usize) -> Result<DownReport> {
        self.guard.check("down")?;
        if count < 1 {
            return Err(MigrateError::InvalidCount);
        }
        self.store.ensure_ledger().await?;
        self.locked(|| self.roll_back(count)).await
    }

    async fn roll_back(&self, count: usize) -> Result<DownReport> {
        let applied = self.store.applied().await?;
        let mut report = DownReport::default();
        if applied.is_empty() {
            tracing::info!("no applied migrations to roll back");
            return Ok(report);
        }

        for record in applied.into_values().rev().take(count) {
            let Some(reverse) = self.registry.find_reverse(record.version)? else {
                tracing::error!(
                    version = record.version,
                    name = %record.name,
                    rolled_back = report.rolled_back.len(),
                    "missing down file, aborting rollback"
                );
                return Err(MigrateError::MissingReverse {
                    version: record.version,
                    name: record.name,
                });
            };
            let sql = fs::read_to_string(&reverse).map_err(|e| MigrateError::io(&reverse, e))?;

            tracing::info!(version = record.version, name = %record.name, "rolling back migration");
            if let Err(source) = self.store.revert(record.version, &sql).await {
                tracing::error!(version = record.version, error = %source, "rollback failed");
                return Err(MigrateError::RevertFailed {
                    version: record.version,
                    name: record.name,
                    source,
                });
            }

            tracing::info!(version = record.version, "rolled back migration");
            report.rolled_back.push(MigrationRef::new(record.version, record.name));
        }

        Ok(report)
    }

    /// Scaffold the next migration pair. Touches only the filesystem.
    pub fn create(&self, name: &str) -> Result<CreatedMigration> {
        self.registry.create(name)
    }
}
