//! Database connection pool ownership
//!
//! The pool is built once from a [`DbConfig`], owned by a [`Database`], and
//! handed out by reference. There is no process-wide lazy pool: whoever
//! constructs the `Database` is the single writer, and whoever owns it closes
//! it with [`Database::shutdown`].

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use thiserror::Error;

/// Default maximum connections for the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const DEFAULT_APPLICATION_NAME: &str = "easy-race-timer";
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_IDLE_TXN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database URL is empty")]
    EmptyUrl,

    #[error("max_connections must be at least 1")]
    ZeroConnections,
}

/// Connection settings applied to every session the pool opens.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub application_name: String,
    pub statement_timeout_ms: u64,
    pub idle_in_transaction_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            idle_in_transaction_timeout_ms: DEFAULT_IDLE_TXN_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        Ok(())
    }

    /// Server settings sent as startup options on each new connection.
    ///
    /// `search_path` is pinned to `public` so nothing depends on whatever the
    /// role's default happens to be.
    pub fn session_options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("search_path", "public".to_string()),
            ("statement_timeout", self.statement_timeout_ms.to_string()),
            (
                "idle_in_transaction_session_timeout",
                self.idle_in_transaction_timeout_ms.to_string(),
            ),
            ("lock_timeout", self.lock_timeout_ms.to_string()),
        ]
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = PgConnectOptions::from_str(&self.database_url)?
            .application_name(&self.application_name)
            .options(self.session_options());
        Ok(options)
    }
}

/// The process's connection pool.
///
/// Cloning the inner [`PgPool`] is cheap and shares the same connections, so
/// components receive `&PgPool` or a clone of it rather than a `Database`.
#[derive(Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create the pool and verify that a connection can be opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or the first connection fails.
    pub async fn connect(config: &DbConfig) -> Result<Self, sqlx::Error> {
        config
            .validate()
            .map_err(|err| sqlx::Error::Configuration(Box::new(err)))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await?;

        tracing::debug!(
            max_connections = config.max_connections,
            application_name = %config.application_name,
            "database pool ready"
        );

        Ok(Self { pool })
    }

    /// Create the pool without opening a connection. Connection errors surface
    /// on first use, so commands that end up not touching the database never
    /// need it to be reachable.
    pub fn connect_lazy(config: &DbConfig) -> Result<Self, sqlx::Error> {
        config
            .validate()
            .map_err(|err| sqlx::Error::Configuration(Box::new(err)))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(config.connect_options()?);

        Ok(Self { pool })
    }

    /// Wrap a pool built elsewhere (tests, embedding applications).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every connection and wait for checked-out ones to come back.
    pub async fn shutdown(self) {
        self.pool.close().await;
        tracing::debug!("database pool closed");
    }
}
