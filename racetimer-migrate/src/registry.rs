//! Migration file discovery
//!
//! Forward files are named `<version>_<name>.sql`, reverse files
//! `<version>_<name>.down.sql`. The directory is re-scanned on every call so a
//! long-lived registry always reflects what is on disk.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::checksum::checksum;
use crate::error::{MigrateError, Result};

/// Suffix distinguishing reverse (down) files from forward ones.
pub const REVERSE_SUFFIX: &str = ".down.sql";

/// Zero-padded width of generated version prefixes.
const VERSION_WIDTH: usize = 4;

static FORWARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_([^.]+)\.sql$").unwrap());
static REVERSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_([^.]+)\.down\.sql$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    pub version: i64,
    pub name: String,
    pub forward: PathBuf,
    pub reverse: Option<PathBuf>,
}

impl MigrationDefinition {
    pub fn read_forward(&self) -> Result<String> {
        fs::read_to_string(&self.forward).map_err(|e| MigrateError::io(&self.forward, e))
    }

    /// Checksum of the forward file as it is on disk now.
    pub fn current_checksum(&self) -> Result<String> {
        let content = fs::read(&self.forward).map_err(|e| MigrateError::io(&self.forward, e))?;
        Ok(checksum(&content))
    }
}

/// Files written by [`MigrationRegistry::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMigration {
    pub version: i64,
    pub name: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Forward,
    Reverse,
}

struct ParsedFile {
    kind: FileKind,
    version: i64,
    name: String,
}

fn parse_file_name(file_name: &str) -> Option<ParsedFile> {
    let (kind, caps) = if let Some(caps) = REVERSE_RE.captures(file_name) {
        (FileKind::Reverse, caps)
    } else {
        (FileKind::Forward, FORWARD_RE.captures(file_name)?)
    };

    let version = match caps[1].parse::<i64>() {
        Ok(v) if v >= 1 => v,
        _ => {
            tracing::warn!(file = file_name, "ignoring migration with unusable version prefix");
            return None;
        }
    };

    Some(ParsedFile {
        kind,
        version,
        name: caps[2].to_string(),
    })
}

#[derive(Default)]
struct Scan {
    forward: BTreeMap<i64, (String, PathBuf)>,
    reverse: BTreeMap<i64, PathBuf>,
}

/// Lowercase the name, collapse every run of non-alphanumeric characters into
/// a single `_`, and trim separators from both ends.
pub fn sanitize_name(raw: &str) -> String {
    let mut name = String::new();
    let mut last_was_sep = false;

    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            name.push(ch);
            last_was_sep = false;
        } else if !name.is_empty() && !last_was_sep {
            name.push('_');
            last_was_sep = true;
        }
    }

    while name.ends_with('_') {
        name.pop();
    }

    name
}

fn forward_template(stem: &str) -> String {
    format!(
        "-- {stem}\n-- Write your SQL statements below. Generated at {}\n\n-- your statements here\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

fn reverse_template(stem: &str) -> String {
    format!(
        "-- Down migration for {stem}\n\
         -- Provide statements to undo the changes in {stem}.sql.\n\
         -- NOTE: Keep this in sync before applying the up migration.\n\n\
         -- down statements here (reverse of up)\n"
    )
}

fn write_new(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => MigrateError::NameCollision {
                path: path.to_path_buf(),
            },
            _ => MigrateError::io(path, e),
        })?;
    file.write_all(content.as_bytes())
        .map_err(|e| MigrateError::io(path, e))
}

/// Directory-backed source of migration definitions.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    dir: PathBuf,
}

impl MigrationRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(&self) -> Result<Scan> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| MigrateError::not_readable(&self.dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrateError::not_readable(&self.dir, e))?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        // read_dir order is platform-defined; sort so duplicate reports are stable
        paths.sort();

        let mut scan = Scan::default();
        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(parsed) = parse_file_name(file_name) else {
                if file_name.ends_with(".sql") {
                    tracing::debug!(file = file_name, "skipping file that is not a migration");
                }
                continue;
            };

            let existing = match parsed.kind {
                FileKind::Forward => match scan.forward.entry(parsed.version) {
                    Entry::Occupied(slot) => Some(slot.get().1.clone()),
                    Entry::Vacant(slot) => {
                        slot.insert((parsed.name, path.clone()));
                        None
                    }
                },
                FileKind::Reverse => match scan.reverse.entry(parsed.version) {
                    Entry::Occupied(slot) => Some(slot.get().clone()),
                    Entry::Vacant(slot) => {
                        slot.insert(path.clone());
                        None
                    }
                },
            };

            if let Some(first) = existing {
                return Err(MigrateError::DuplicateVersion {
                    version: parsed.version,
                    first,
                    second: path,
                });
            }
        }

        Ok(scan)
    }

    /// Forward migrations in ascending version order, each paired with its
    /// reverse file when one exists.
    pub fn list(&self) -> Result<Vec<MigrationDefinition>> {
        let mut scan = self.scan()?;
        let migrations = scan
            .forward
            .into_iter()
            .map(|(version, (name, forward))| MigrationDefinition {
                version,
                name,
                forward,
                reverse: scan.reverse.remove(&version),
            })
            .collect();
        Ok(migrations)
    }

    pub fn find(&self, version: i64) -> Result<Option<MigrationDefinition>> {
        Ok(self.list()?.into_iter().find(|m| m.version == version))
    }

    pub fn find_reverse(&self, version: i64) -> Result<Option<PathBuf>> {
        Ok(self.scan()?.reverse.remove(&version))
    }

    /// Write a forward/reverse template pair for the next version.
    ///
    /// Never overwrites: if either target file exists, nothing is written for
    /// it and [`MigrateError::NameCollision`] is returned.
    pub fn create(&self, raw_name: &str) -> Result<CreatedMigration> {
        let name = sanitize_name(raw_name);
        if name.is_empty() {
            return Err(MigrateError::InvalidName {
                raw: raw_name.to_string(),
            });
        }

        let version = self.list()?.last().map_or(1, |m| m.version + 1);
        let stem = format!("{version:0width$}_{name}", width = VERSION_WIDTH);
        let forward = self.dir.join(format!("{stem}.sql"));
        let reverse = self.dir.join(format!("{stem}{REVERSE_SUFFIX}"));

        if reverse.exists() {
            return Err(MigrateError::NameCollision { path: reverse });
        }

        write_new(&forward, &forward_template(&stem))?;
        write_new(&reverse, &reverse_template(&stem))?;

        tracing::info!(version, file = %forward.display(), "created migration");
        Ok(CreatedMigration {
            version,
            name,
            forward,
            reverse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_list_orders_by_version_and_pairs_reverse() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        touch(dir, "0010_late.sql", "SELECT 10;");
        touch(dir, "0002_add_users.sql", "SELECT 2;");
        touch(dir, "0002_add_users.down.sql", "SELECT -2;");
        touch(dir, "0001_init.sql", "SELECT 1;");

        let migrations = MigrationRegistry::new(dir).list().unwrap();

        let versions: Vec<i64> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 10]);
        assert_eq!(migrations[1].name, "add_users");
        assert_eq!(
            migrations[1].reverse.as_deref(),
            Some(dir.join("0002_add_users.down.sql").as_path())
        );
        assert!(migrations[0].reverse.is_none());
    }

    #[test]
    fn test_list_ignores_unrelated_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        touch(dir, "README.md", "docs");
        touch(dir, "init.sql", "SELECT 1;");
        touch(dir, "0003_v1.2_fix.sql", "SELECT 3;");
        touch(dir, "0000_zero.sql", "SELECT 0;");
        touch(dir, "0001_init.sql", "SELECT 1;");
        fs::create_dir(dir.join("0004_dir.sql")).unwrap();

        let migrations = MigrationRegistry::new(dir).list().unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "init");
    }

    #[test]
    fn test_empty_directory_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        assert!(MigrationRegistry::new(temp_dir.path()).list().unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_not_readable() {
        let temp_dir = TempDir::new().unwrap();
        let registry = MigrationRegistry::new(temp_dir.path().join("nope"));
        assert!(matches!(
            registry.list(),
            Err(MigrateError::NotReadable { .. })
        ));
    }

    #[test]
    fn test_duplicate_versions_fail_fast() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        touch(dir, "0001_init.sql", "SELECT 1;");
        touch(dir, "0001_other.sql", "SELECT 1;");

        match MigrationRegistry::new(dir).list() {
            Err(MigrateError::DuplicateVersion {
                version,
                first,
                second,
            }) => {
                assert_eq!(version, 1);
                assert_eq!(first, dir.join("0001_init.sql"));
                assert_eq!(second, dir.join("0001_other.sql"));
            }
            other => panic!("Expected duplicate version, got: {:?}", other),
        }
    }

    #[test]
    fn test_find_reverse_by_version() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        touch(dir, "0001_init.sql", "SELECT 1;");
        touch(dir, "0001_init.down.sql", "SELECT -1;");
        touch(dir, "0002_add_users.sql", "SELECT 2;");

        let registry = MigrationRegistry::new(dir);
        assert_eq!(
            registry.find_reverse(1).unwrap(),
            Some(dir.join("0001_init.down.sql"))
        );
        assert_eq!(registry.find_reverse(2).unwrap(), None);
        assert_eq!(registry.find(2).unwrap().unwrap().name, "add_users");
        assert!(registry.find(3).unwrap().is_none());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("billing_fields"), "billing_fields");
        assert_eq!(sanitize_name("  Add Users!! table "), "add_users_table");
        assert_eq!(sanitize_name("__Leading--and--trailing__"), "leading_and_trailing");
        assert_eq!(sanitize_name("Ünïcode"), "n_code");
        assert_eq!(sanitize_name("!!!"), "");
    }

    #[test]
    fn test_create_first_migration_pair() {
        let temp_dir = TempDir::new().unwrap();
        let registry = MigrationRegistry::new(temp_dir.path());

        let created = registry.create("billing fields").unwrap();

        assert_eq!(created.version, 1);
        assert_eq!(created.forward, temp_dir.path().join("0001_billing_fields.sql"));
        assert_eq!(
            created.reverse,
            temp_dir.path().join("0001_billing_fields.down.sql")
        );
        let forward = fs::read_to_string(&created.forward).unwrap();
        assert!(forward.starts_with("-- 0001_billing_fields\n"));
        let reverse = fs::read_to_string(&created.reverse).unwrap();
        assert!(reverse.contains("0001_billing_fields.sql"));

        let listed = registry.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reverse.as_ref(), Some(&created.reverse));
    }

    #[test]
    fn test_create_continues_after_highest_version() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "0007_existing.sql", "SELECT 7;");

        let created = MigrationRegistry::new(temp_dir.path())
            .create("next")
            .unwrap();
        assert_eq!(created.version, 8);
        assert!(created.forward.ends_with("0008_next.sql"));
    }

    #[test]
    fn test_create_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        touch(dir, "0001_billing_fields.down.sql", "-- keep me");

        let err = MigrationRegistry::new(dir).create("billing_fields").unwrap_err();

        assert!(matches!(err, MigrateError::NameCollision { .. }));
        assert_eq!(
            fs::read_to_string(dir.join("0001_billing_fields.down.sql")).unwrap(),
            "-- keep me"
        );
        assert!(!dir.join("0001_billing_fields.sql").exists());
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            MigrationRegistry::new(temp_dir.path()).create("--"),
            Err(MigrateError::InvalidName { .. })
        ));
    }
}
