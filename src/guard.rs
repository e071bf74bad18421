//! Validation for every value read back from savepoint history before it is
//! allowed near a subprocess or the filesystem.
//!
//! History rows can be edited by hand, so nothing stored is trusted: dump
//! paths are re-checked against the backup directory and the filename grammar
//! on every read, revision ids against a hex grammar, and database names
//! against a plain identifier grammar.

use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::utils::io::to_slash;

const DUMP_NAME_FORMAT: &str = "backup_%Y-%m-%d_%H-%M-%S.sql";
const MESSAGE_MAX_CHARS: usize = 500;

static DUMP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup_\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}\.sql$").expect("dump name pattern")
});
static REVISION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{4,64}$").expect("revision pattern"));
static DB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("database name pattern"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("dump path is empty")]
    EmptyPath,
    #[error("dump path '{0}' must be relative to the project root")]
    AbsolutePath(String),
    #[error("dump path '{0}' contains a traversal or empty segment")]
    Traversal(String),
    #[error("dump path '{path}' is not directly under the backup directory '{backup_dir}'")]
    OutsideBackupDir { path: String, backup_dir: String },
    #[error("dump filename '{0}' does not match backup_YYYY-MM-DD_HH-MM-SS.sql")]
    BadFileName(String),
    #[error("dump file '{0}' resolves outside the backup directory")]
    EscapesBackupDir(String),
    #[error("backup directory '{0}' is not a clean relative path")]
    BadBackupDir(String),
    #[error("revision id '{0}' is not a hex commit id")]
    BadRevision(String),
    #[error("database name '{0}' must match [A-Za-z_][A-Za-z0-9_]{{0,63}}")]
    BadDatabaseName(String),
}

/// Dump filename for a given instant. The only writer-side producer of the grammar.
pub fn dump_file_name(at: DateTime<Local>) -> String {
    at.format(DUMP_NAME_FORMAT).to_string()
}

pub fn is_valid_dump_file_name(name: &str) -> bool {
    DUMP_NAME.is_match(name) && NaiveDateTime::parse_from_str(name, DUMP_NAME_FORMAT).is_ok()
}

pub fn validate_revision(rev: &str) -> Result<&str, GuardError> {
    if REVISION.is_match(rev) { Ok(rev) } else { Err(GuardError::BadRevision(rev.to_string())) }
}

pub fn validate_database_name(name: &str) -> Result<&str, GuardError> {
    if DB_NAME.is_match(name) { Ok(name) } else { Err(GuardError::BadDatabaseName(name.to_string())) }
}

/// Strip control characters, collapse to a single line and cap the length.
pub fn sanitize_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().chars().take(MESSAGE_MAX_CHARS).collect::<String>().trim_end().to_string()
}

fn clean_segments(raw: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\0')) {
        return None;
    }
    Some(segments)
}

fn looks_absolute(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    raw.starts_with('/') || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
}

/// Confines dump paths to `<project_root>/<backup_dir>/backup_*.sql`.
#[derive(Debug, Clone)]
pub struct PathGuard {
    project_root: PathBuf,
    backup_dir: String,
}

impl PathGuard {
    pub fn new(project_root: &Path, backup_dir: &str) -> Result<Self, GuardError> {
        let normalized = backup_dir.replace('\\', "/").trim_end_matches('/').to_string();
        if normalized.is_empty() || looks_absolute(&normalized) || clean_segments(&normalized).is_none() {
            return Err(GuardError::BadBackupDir(backup_dir.to_string()));
        }
        Ok(Self { project_root: project_root.to_path_buf(), backup_dir: normalized })
    }

    #[cfg(test)]
    pub fn backup_dir(&self) -> &str {
        &self.backup_dir
    }

    pub fn backup_dir_path(&self) -> PathBuf {
        self.project_root.join(&self.backup_dir)
    }

    /// Relative form stored in history for a freshly written dump.
    pub fn relative_dump_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.backup_dir, file_name)
    }

    /// Validate a stored relative dump path and return its absolute location.
    /// The file does not have to exist; if it does, symlinks must not lead out
    /// of the backup directory.
    pub fn resolve_dump_path(&self, stored: &str) -> Result<PathBuf, GuardError> {
        if stored.is_empty() {
            return Err(GuardError::EmptyPath);
        }
        let raw = stored.replace('\\', "/");
        if looks_absolute(&raw) {
            return Err(GuardError::AbsolutePath(stored.to_string()));
        }
        let segments = clean_segments(&raw).ok_or_else(|| GuardError::Traversal(stored.to_string()))?;
        let (file_name, dirs) = segments.split_last().ok_or(GuardError::EmptyPath)?;
        if dirs.join("/") != self.backup_dir {
            return Err(GuardError::OutsideBackupDir {
                path: stored.to_string(),
                backup_dir: self.backup_dir.clone(),
            });
        }
        if !is_valid_dump_file_name(file_name) {
            return Err(GuardError::BadFileName(file_name.to_string()));
        }

        let dir = self.backup_dir_path();
        let full = dir.join(file_name);
        if full.exists() {
            let escaped = match (std::fs::canonicalize(&full), std::fs::canonicalize(&dir)) {
                (Ok(f), Ok(d)) => !f.starts_with(&d),
                _ => true,
            };
            if escaped {
                return Err(GuardError::EscapesBackupDir(to_slash(&full)));
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn guard(root: &Path) -> PathGuard {
        PathGuard::new(root, "backups").unwrap()
    }

    #[test]
    fn dump_name_round_trips_through_grammar() {
        let at = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        let name = dump_file_name(at);
        assert_eq!(name, "backup_2024-01-01_00-00-00.sql");
        assert!(is_valid_dump_file_name(&name));
    }

    #[test]
    fn grammar_is_exact() {
        for bad in [
            "backup_2024-01-01_00-00-00.sql.gz",
            "xbackup_2024-01-01_00-00-00.sql",
            "backup_2024-1-01_00-00-00.sql",
            "backup_2024-01-01_00-00-00 .sql",
            "backup_2024-13-01_00-00-00.sql",
            "backup_2024-01-01_00-00-00.sql;rm -rf ~",
            "backup_2024-01-01_00-00-00.SQL",
        ] {
            assert!(!is_valid_dump_file_name(bad), "{bad} accepted");
        }
    }

    #[test]
    fn accepts_well_formed_path() {
        let root = TempDir::new().unwrap();
        let p = guard(root.path()).resolve_dump_path("backups/backup_2024-01-01_00-00-00.sql").unwrap();
        assert_eq!(p, root.path().join("backups").join("backup_2024-01-01_00-00-00.sql"));

        let win = guard(root.path()).resolve_dump_path(r"backups\backup_2024-01-01_00-00-00.sql").unwrap();
        assert_eq!(win, p);
    }

    #[test]
    fn rejects_tampered_paths() {
        let root = TempDir::new().unwrap();
        let g = guard(root.path());
        assert_eq!(g.resolve_dump_path(""), Err(GuardError::EmptyPath));
        assert!(matches!(
            g.resolve_dump_path("/etc/backups/backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::AbsolutePath(_))
        ));
        assert!(matches!(
            g.resolve_dump_path("C:/backups/backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::AbsolutePath(_))
        ));
        assert!(matches!(
            g.resolve_dump_path("backups/../backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::Traversal(_))
        ));
        assert!(matches!(
            g.resolve_dump_path("backups//backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::Traversal(_))
        ));
        assert!(matches!(
            g.resolve_dump_path("other/backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::OutsideBackupDir { .. })
        ));
        assert!(matches!(
            g.resolve_dump_path("backups/nested/backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::OutsideBackupDir { .. })
        ));
        assert!(matches!(g.resolve_dump_path("backups/dump.sql"), Err(GuardError::BadFileName(_))));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("backups")).unwrap();
        let secret = outside.path().join("secret.sql");
        std::fs::write(&secret, "DROP DATABASE live;").unwrap();
        std::os::unix::fs::symlink(&secret, root.path().join("backups/backup_2024-01-01_00-00-00.sql")).unwrap();

        assert!(matches!(
            guard(root.path()).resolve_dump_path("backups/backup_2024-01-01_00-00-00.sql"),
            Err(GuardError::EscapesBackupDir(_))
        ));
    }

    #[test]
    fn backup_dir_must_be_clean() {
        let root = TempDir::new().unwrap();
        assert!(PathGuard::new(root.path(), "../backups").is_err());
        assert!(PathGuard::new(root.path(), "/var/backups").is_err());
        assert!(PathGuard::new(root.path(), "").is_err());
        assert_eq!(PathGuard::new(root.path(), "data/backups/").unwrap().backup_dir(), "data/backups");
    }

    #[test]
    fn revisions_and_database_names() {
        assert!(validate_revision("abc1234").is_ok());
        assert!(validate_revision("0123456789abcdef0123456789abcdef01234567").is_ok());
        assert!(validate_revision("abc123").is_ok());
        assert!(validate_revision("abc").is_err());
        assert!(validate_revision("ABC1234").is_err());
        assert!(validate_revision("HEAD").is_err());
        assert!(validate_revision("abc1234; rm -rf /").is_err());

        assert!(validate_database_name("test_restore_1").is_ok());
        assert!(validate_database_name("_shadow").is_ok());
        assert!(validate_database_name("1abc").is_err());
        assert!(validate_database_name("shop`; DROP DATABASE live; --").is_err());
        assert!(validate_database_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn messages_are_sanitized() {
        assert_eq!(sanitize_message("  release\n2.1\x07 ready \t"), "release 2.1 ready");
        assert_eq!(sanitize_message(&"x".repeat(900)).chars().count(), 500);
        assert_eq!(sanitize_message("\x01\x02"), "");
    }
}
