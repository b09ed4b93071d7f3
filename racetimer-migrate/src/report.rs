//! Typed outcomes of runner operations

use std::fmt;

use serde::Serialize;

use crate::ledger::LedgerRecord;

/// A migration identified by version and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRef {
    pub version: i64,
    pub name: String,
}

impl MigrationRef {
    pub fn new(version: i64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.version, self.name)
    }
}

/// Where a migration file stands relative to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    /// No ledger record
    Pending,
    /// Recorded checksum matches the file
    Clean,
    /// Recorded checksum differs from the file
    Drift { recorded: String, current: String },
    /// Legacy record applied before checksums were tracked
    NoChecksum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: i64,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    /// Ledger rows with no forward file left in the directory
    pub orphaned: Vec<LedgerRecord>,
}

impl StatusReport {
    pub fn summary(&self) -> CheckReport {
        let mut report = CheckReport::default();
        for entry in &self.entries {
            match entry.state {
                MigrationState::Pending => report.pending += 1,
                MigrationState::Drift { .. } => report.drifted += 1,
                MigrationState::NoChecksum => report.missing_checksums += 1,
                MigrationState::Clean => {}
            }
        }
        report
    }
}

/// Counts gating CI: all three must be zero for `check` to pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub pending: usize,
    pub drifted: usize,
    pub missing_checksums: usize,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.pending == 0 && self.drifted == 0 && self.missing_checksums == 0
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("OK");
        }
        let mut parts = Vec::new();
        if self.pending > 0 {
            parts.push(format!("Pending migrations: {}", self.pending));
        }
        if self.drifted > 0 {
            parts.push(format!("Drifted migrations: {}", self.drifted));
        }
        if self.missing_checksums > 0 {
            parts.push(format!("Migrations missing checksum: {}", self.missing_checksums));
        }
        f.write_str(&parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    pub applied: Vec<AppliedMigration>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub filled: Vec<MigrationRef>,
    /// Ledger rows whose file could not be found
    pub skipped: Vec<MigrationRef>,
}

impl BackfillReport {
    pub fn is_noop(&self) -> bool {
        self.filled.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebaselineReport {
    /// Rows whose stored checksum differed or was missing
    pub rewritten: Vec<MigrationRef>,
    pub unchanged: Vec<MigrationRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownReport {
    pub rolled_back: Vec<MigrationRef>,
}
