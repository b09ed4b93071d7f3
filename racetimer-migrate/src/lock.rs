//! Cross-process mutual exclusion for mutating migration runs
//!
//! Postgres session-level advisory locks belong to the session that took them,
//! so the coordinator pins one pooled connection for as long as the lock is
//! held and unlocks on that same connection.

use sha1::{Digest, Sha1};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;

/// Every runner derives the same lock key from this name.
pub const LOCK_NAME: &str = "easy-race-timer-schema-lock";

/// The first 15 hex digits of the name's SHA-1 digest as a positive 60-bit
/// integer (fits `pg_try_advisory_lock(bigint)`). Same key as the Node runner,
/// so the two exclude each other.
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha1::digest(name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) >> 4) as i64
}

#[derive(Debug)]
pub struct LockCoordinator {
    pool: PgPool,
    key: i64,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl LockCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self::with_key(pool, lock_key(LOCK_NAME))
    }

    pub fn with_key(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            held: Mutex::new(None),
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Try to take the lock without waiting. `false` means another session
    /// holds it, or this coordinator already does.
    pub async fn try_acquire(&self) -> Result<bool, sqlx::Error> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;

        if locked {
            tracing::debug!(key = self.key, "acquired migration lock");
            *held = Some(conn);
        }
        Ok(locked)
    }

    /// Best-effort unlock. If the unlock statement fails the pinned connection
    /// is closed instead of recycled, which ends the session and its lock.
    ///
    /// The connection stays in the coordinator until the unlock has finished,
    /// so a cancelled release is still covered by [`LockCoordinator::abandon`].
    pub async fn release(&self) {
        let mut held = self.held.lock().await;
        let Some(conn) = held.as_mut() else {
            return;
        };

        let unlocked = sqlx::query_as::<_, (bool,)>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut **conn)
            .await;

        let Some(mut conn) = held.take() else {
            return;
        };
        match unlocked {
            Ok((true,)) => tracing::debug!(key = self.key, "released migration lock"),
            Ok((false,)) => tracing::warn!(key = self.key, "migration lock was not held at release"),
            Err(error) => {
                tracing::warn!(key = self.key, error = %error, "failed to release migration lock, closing its session");
                conn.close_on_drop();
            }
        }
    }

    /// Synchronous fallback for a run that ended without [`release`]: close
    /// the pinned session so the server drops the lock with it.
    ///
    /// [`release`]: LockCoordinator::release
    pub fn abandon(&self) {
        match self.held.try_lock() {
            Ok(mut held) => {
                if let Some(conn) = held.take() {
                    close_abandoned(self.key, conn);
                }
            }
            // Whoever holds the mutex is mid-acquire or mid-release and will
            // finish; Drop covers the rest.
            Err(_) => tracing::debug!(key = self.key, "lock state busy, leaving abandon to drop"),
        }
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        if let Some(conn) = self.held.get_mut().take() {
            close_abandoned(self.key, conn);
        }
    }
}

fn close_abandoned(key: i64, mut conn: PoolConnection<Postgres>) {
    tracing::warn!(key, "migration lock abandoned without release, closing its session");
    conn.close_on_drop();
}
