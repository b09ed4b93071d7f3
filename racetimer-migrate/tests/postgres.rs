//! Postgres-backed runner tests
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p racetimer-migrate -- --ignored

use std::fs;
use std::path::Path;

use racetimer_migrate::{
    ChecksumLedger, EnvironmentGuard, LockCoordinator, MigrateError, MigrationRegistry,
    MigrationRunner, MigrationState, PgSchemaStore,
};
use sqlx::PgPool;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn runner(dir: &Path, pool: &PgPool) -> MigrationRunner<PgSchemaStore> {
    MigrationRunner::new(
        MigrationRegistry::new(dir),
        PgSchemaStore::new(pool.clone()),
        EnvironmentGuard::default(),
    )
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn up_is_idempotent_and_detects_drift(pool: PgPool) {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "0001_init.sql", "CREATE TABLE competitions (id int PRIMARY KEY);");
    write(temp_dir.path(), "0002_add_users.sql", "CREATE TABLE users (id int PRIMARY KEY);");
    let runner = runner(temp_dir.path(), &pool);

    let first = runner.up().await.unwrap();
    assert_eq!(first.applied.len(), 2);
    let second = runner.up().await.unwrap();
    assert!(second.applied.is_empty());

    let ledger = ChecksumLedger::new(pool.clone()).all_applied().await.unwrap();
    assert_eq!(ledger.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(ledger.values().all(|r| r.checksum.is_some()));

    write(temp_dir.path(), "0001_init.sql", "CREATE TABLE competitions (id bigint PRIMARY KEY);");
    let status = runner.status().await.unwrap();
    assert!(matches!(status.entries[0].state, MigrationState::Drift { .. }));
    assert_eq!(status.entries[1].state, MigrationState::Clean);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn failed_migration_leaves_no_trace(pool: PgPool) {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        "0001_broken.sql",
        "CREATE TABLE half_done (id int); SELECT * FROM no_such_table;",
    );

    let result = runner(temp_dir.path(), &pool).up().await;
    assert!(matches!(result, Err(MigrateError::ApplyFailed { version: 1, .. })));

    let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass('public.half_done') IS NOT NULL")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!exists);
    assert!(ChecksumLedger::new(pool.clone()).all_applied().await.unwrap().is_empty());
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn down_reverses_schema_and_ledger(pool: PgPool) {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "0001_init.sql", "CREATE TABLE competitions (id int);");
    write(temp_dir.path(), "0001_init.down.sql", "DROP TABLE competitions;");
    let runner = runner(temp_dir.path(), &pool);
    runner.up().await.unwrap();

    let report = runner.down(1).await.unwrap();
    assert_eq!(report.rolled_back.len(), 1);

    let (exists,): (bool,) =
        sqlx::query_as("SELECT to_regclass('public.competitions') IS NOT NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(!exists);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn ensure_schema_adds_checksum_to_legacy_ledger(pool: PgPool) {
    sqlx::raw_sql(
        "CREATE TABLE schema_migrations (
            id BIGSERIAL PRIMARY KEY,
            version BIGINT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            run_at TIMESTAMPTZ DEFAULT now()
        );
        INSERT INTO schema_migrations (version, name) VALUES (1, 'init');",
    )
    .execute(&pool)
    .await
    .unwrap();

    let ledger = ChecksumLedger::new(pool.clone());
    ledger.ensure_schema().await.unwrap();
    ledger.ensure_schema().await.unwrap();

    let applied = ledger.all_applied().await.unwrap();
    assert_eq!(applied[&1].name, "init");
    assert!(applied[&1].checksum.is_none());
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn advisory_lock_is_exclusive_across_sessions(pool: PgPool) {
    let first = LockCoordinator::with_key(pool.clone(), 424_242);
    let second = LockCoordinator::with_key(pool.clone(), 424_242);

    assert!(first.try_acquire().await.unwrap());
    assert!(!second.try_acquire().await.unwrap());

    first.release().await;
    assert!(second.try_acquire().await.unwrap());
    second.release().await;
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn coordinator_does_not_reenter_its_own_lock(pool: PgPool) {
    let lock = LockCoordinator::with_key(pool.clone(), 424_243);

    assert!(lock.try_acquire().await.unwrap());
    assert!(!lock.try_acquire().await.unwrap());

    lock.release().await;
    assert!(lock.try_acquire().await.unwrap());
    lock.release().await;
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn concurrent_up_on_one_runner_applies_once(pool: PgPool) {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "0001_init.sql", "CREATE TABLE competitions (id int PRIMARY KEY);");
    let runner = runner(temp_dir.path(), &pool);
    // Create the ledger up front so the race is only over the lock
    runner.status().await.unwrap();

    let (a, b) = tokio::join!(runner.up(), runner.up());

    let outcomes = [a, b];
    assert!(outcomes
        .iter()
        .all(|r| matches!(r, Ok(_) | Err(MigrateError::LockUnavailable))));
    let applied: usize = outcomes
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|report| report.applied.len())
        .sum();
    assert_eq!(applied, 1);
    let ledger = ChecksumLedger::new(pool.clone()).all_applied().await.unwrap();
    assert_eq!(ledger.len(), 1);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires database"]
async fn dropped_coordinator_frees_the_lock(pool: PgPool) {
    let first = LockCoordinator::with_key(pool.clone(), 424_244);
    let second = LockCoordinator::with_key(pool.clone(), 424_244);
    assert!(first.try_acquire().await.unwrap());

    drop(first);

    // The pinned session closes in the background
    let mut acquired = false;
    for _ in 0..50 {
        if second.try_acquire().await.unwrap() {
            acquired = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(acquired);
    second.release().await;
}
