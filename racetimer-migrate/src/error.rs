//! Error types for racetimer-migrate
//!
//! Every runner operation returns a typed [`MigrateError`]. The CLI maps the
//! variants that need their own exit status (lock, guard, check gate) and treats
//! everything else as a generic failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::report::CheckReport;

#[derive(Error, Debug)]
pub enum MigrateError {
    /// Migration directory missing or unreadable
    #[error("Migration directory {path:?} is not readable: {source}")]
    NotReadable { path: PathBuf, source: io::Error },

    /// Two forward (or two reverse) files share a version number
    #[error("Duplicate migration version {version}: {first:?} and {second:?}")]
    DuplicateVersion {
        version: i64,
        first: PathBuf,
        second: PathBuf,
    },

    /// Reading or writing a single migration file failed
    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// Ledger, lock, or connection failure outside a migration body
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another process holds the migration lock
    #[error("Could not acquire advisory lock. Another migration process may be running.")]
    LockUnavailable,

    /// A forward migration's SQL failed; its transaction was rolled back
    #[error("Migration {version} ({name}) failed: {source}")]
    ApplyFailed {
        version: i64,
        name: String,
        source: sqlx::Error,
    },

    /// No reverse file exists for a migration selected for rollback
    #[error("Missing down file for migration {version} ({name}); rollback aborted")]
    MissingReverse { version: i64, name: String },

    /// A reverse migration's SQL failed; its transaction was rolled back
    #[error("Rollback of migration {version} ({name}) failed: {source}")]
    RevertFailed {
        version: i64,
        name: String,
        source: sqlx::Error,
    },

    /// Destructive operation requested in a production environment without force
    #[error("Refusing to run '{action}' in production without MIGRATION_FORCE=1")]
    GuardRefused { action: &'static str },

    /// `new` would overwrite an existing file
    #[error("Migration file already exists: {path:?}")]
    NameCollision { path: PathBuf },

    /// The requested migration name has no usable characters
    #[error("Invalid migration name '{raw}'")]
    InvalidName { raw: String },

    #[error("Rollback count must be >= 1")]
    InvalidCount,

    /// Pending, drifted, or checksum-less migrations found by `check`
    #[error("Migration check failed: {0}")]
    CheckFailed(CheckReport),
}

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    pub fn not_readable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::NotReadable {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::GuardRefused { action: "down" };
        assert_eq!(
            err.to_string(),
            "Refusing to run 'down' in production without MIGRATION_FORCE=1"
        );

        let err = MigrateError::MissingReverse {
            version: 2,
            name: "add_users".into(),
        };
        assert!(err.to_string().contains("migration 2 (add_users)"));
    }

    #[test]
    fn test_check_failure_lists_counts() {
        let err = MigrateError::CheckFailed(CheckReport {
            pending: 1,
            drifted: 0,
            missing_checksums: 2,
        });
        let text = err.to_string();
        assert!(text.contains("Pending migrations: 1"));
        assert!(text.contains("Migrations missing checksum: 2"));
        assert!(!text.contains("Drifted"));
    }
}
