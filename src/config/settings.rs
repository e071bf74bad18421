//! Settings for one project root.
//!
//! Values come from a `ConfigSource` (section/key lookup with defaults), by
//! default `<root>/.savepoint/config.toml`. A missing file means defaults.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::debug;

pub const STATE_DIR: &str = ".savepoint";
pub const CONFIG_FILE: &str = "config.toml";

/// Section/key configuration lookup provided by the host application.
pub trait ConfigSource {
    fn get(&self, section: &str, key: &str) -> Option<Value>;

    fn string_or(&self, section: &str, key: &str, default: &str) -> String {
        match self.get(section, key) {
            Some(Value::String(s)) => s,
            Some(Value::Integer(i)) => i.to_string(),
            _ => default.to_string(),
        }
    }

    fn opt_string(&self, section: &str, key: &str) -> Option<String> {
        match self.get(section, key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    fn bool_or(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            Some(Value::Boolean(b)) => b,
            Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
            Some(Value::Integer(i)) => i != 0,
            _ => default,
        }
    }

    fn int_or(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.get(section, key) {
            Some(Value::Integer(i)) => i,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn list_or(&self, section: &str, key: &str, default: &[&str]) -> Vec<String> {
        match self.get(section, key) {
            Some(Value::Array(items)) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// `ConfigSource` backed by a parsed TOML document.
#[derive(Debug, Default, Clone)]
pub struct TomlConfig {
    table: Table,
}

impl TomlConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let table: Table = toml::from_str(content).map_err(|e| anyhow!("failed to parse config: {}", e))?;
        Ok(Self { table })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Self::parse(&content)
    }

    pub fn load_for_root(root: &Path) -> Result<Self> {
        Self::load(&root.join(STATE_DIR).join(CONFIG_FILE))
    }
}

impl ConfigSource for TomlConfig {
    fn get(&self, section: &str, key: &str) -> Option<Value> {
        self.table.get(section)?.as_table()?.get(key).cloned()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    Mysql,
    Postgres,
}

/// Connection parameters for the live database; the "database handle"
/// injected into dump backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub driver: DbDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub binary: Option<String>,
    pub remote: String,
    pub auto_push: bool,
    pub exclude: Vec<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub connection: DatabaseConnection,
    pub dump_binary: Option<String>,
    pub client_binary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub backup_before_restore: bool,
    /// Project-relative file carrying the database name in a restored tree.
    pub config_file: String,
    pub config_key: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    pub backup_data_dir: String,
    pub history_file: String,
    pub git: GitSettings,
    pub database: DatabaseSettings,
    pub restore: RestoreSettings,
}

impl Settings {
    pub fn resolve(project_root: &Path, source: &dyn ConfigSource) -> Result<Self> {
        let backup_data_dir = source.string_or("paths", "backup_data_dir", "backups");
        let history_file = source.string_or("paths", "history_file", ".savepoint/history.json");
        let history_file = project_relative(&history_file)
            .ok_or_else(|| anyhow!("history_file '{}' must be a relative path inside the project", history_file))?;

        // savepoint's own state must never be committed, or a hard reset rewinds it
        let mut exclude = source.list_or("git", "exclude", &[]);
        for always in [backup_data_dir.as_str(), STATE_DIR, history_file.as_str()] {
            let covered = exclude
                .iter()
                .any(|e| always == e || always.starts_with(&format!("{}/", e.trim_end_matches('/'))));
            if !covered {
                exclude.push(always.to_string());
            }
        }

        let driver = match source.string_or("database", "driver", "mysql").as_str() {
            "mysql" | "mariadb" => DbDriver::Mysql,
            "postgres" | "postgresql" | "pgsql" => DbDriver::Postgres,
            other => return Err(anyhow!("unsupported database driver '{}'", other)),
        };
        let default_port = match driver {
            DbDriver::Mysql => 3306,
            DbDriver::Postgres => 5432,
        };
        let port = source.int_or("database", "port", default_port);
        let port = u16::try_from(port).map_err(|_| anyhow!("database port {} out of range", port))?;

        Ok(Self {
            project_root: project_root.to_path_buf(),
            backup_data_dir,
            history_file,
            git: GitSettings {
                binary: source.opt_string("git", "binary"),
                remote: source.string_or("git", "remote", "origin"),
                auto_push: source.bool_or("git", "auto_push", false),
                exclude,
                author_name: source.opt_string("git", "author_name"),
                author_email: source.opt_string("git", "author_email"),
            },
            database: DatabaseSettings {
                connection: DatabaseConnection {
                    driver,
                    host: source.string_or("database", "host", "localhost"),
                    port,
                    user: source.string_or("database", "user", "root"),
                    password: source.opt_string("database", "password"),
                    database: source.string_or("database", "name", ""),
                },
                dump_binary: source.opt_string("database", "dump_binary"),
                client_binary: source.opt_string("database", "client_binary"),
            },
            restore: RestoreSettings {
                backup_before_restore: source.bool_or("restore", "backup_before_restore", true),
                config_file: source.string_or("restore", "config_file", ".env"),
                config_key: source.string_or("restore", "config_key", "DB_NAME"),
            },
        })
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let source = TomlConfig::load_for_root(project_root)?;
        Self::resolve(project_root, &source)
    }

    pub fn history_path(&self) -> PathBuf {
        self.project_root.join(&self.history_file)
    }
}

/// Slash form of a path that stays inside the project root, or None.
fn project_relative(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();
    let escapes = segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..");
    if escapes || Path::new(&normalized).is_absolute() || normalized.contains(':') {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let s = Settings::load(dir.path()).unwrap();
        assert_eq!(s.backup_data_dir, "backups");
        assert_eq!(s.git.remote, "origin");
        assert!(!s.git.auto_push);
        assert!(s.restore.backup_before_restore);
        assert_eq!(s.database.connection.driver, DbDriver::Mysql);
        assert_eq!(s.database.connection.port, 3306);
        assert_eq!(s.git.exclude, vec!["backups".to_string(), ".savepoint".to_string()]);
        assert_eq!(s.history_path(), dir.path().join(".savepoint/history.json"));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        fs::write(
            dir.path().join(STATE_DIR).join(CONFIG_FILE),
            r#"
[paths]
backup_data_dir = "var/dumps"

[git]
auto_push = "yes"
exclude = ["node_modules", "var/cache"]

[database]
driver = "postgres"
name = "shop"
user = "shop"
password = "s3cret"

[restore]
backup_before_restore = false
"#,
        )
        .unwrap();

        let s = Settings::load(dir.path()).unwrap();
        assert_eq!(s.backup_data_dir, "var/dumps");
        assert!(s.git.auto_push);
        assert_eq!(s.git.exclude, vec!["node_modules", "var/cache", "var/dumps", ".savepoint"]);
        assert_eq!(s.database.connection.driver, DbDriver::Postgres);
        assert_eq!(s.database.connection.port, 5432);
        assert_eq!(s.database.connection.password.as_deref(), Some("s3cret"));
        assert!(!s.restore.backup_before_restore);
    }

    #[test]
    fn relocated_history_file_is_excluded_from_commits() {
        let dir = TempDir::new().unwrap();
        let cfg = TomlConfig::parse("[paths]\nhistory_file = \"data/history.json\"\n").unwrap();
        let s = Settings::resolve(dir.path(), &cfg).unwrap();
        assert_eq!(s.git.exclude, vec!["backups", ".savepoint", "data/history.json"]);
        assert_eq!(s.history_path(), dir.path().join("data/history.json"));

        let cfg = TomlConfig::parse("[paths]\nhistory_file = \"data/history.json\"\n[git]\nexclude = [\"data/\"]\n").unwrap();
        let s = Settings::resolve(dir.path(), &cfg).unwrap();
        assert_eq!(s.git.exclude, vec!["data/", "backups", ".savepoint"]);
    }

    #[test]
    fn history_file_must_stay_inside_project() {
        let dir = TempDir::new().unwrap();
        for bad in ["../history.json", "/var/lib/history.json", "data//history.json", ""] {
            let cfg = TomlConfig::parse(&format!("[paths]\nhistory_file = \"{}\"\n", bad)).unwrap();
            assert!(Settings::resolve(dir.path(), &cfg).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn rejects_unknown_driver_and_bad_port() {
        let dir = TempDir::new().unwrap();
        let cfg = TomlConfig::parse("[database]\ndriver = \"oracle\"\n").unwrap();
        assert!(Settings::resolve(dir.path(), &cfg).is_err());
        let cfg = TomlConfig::parse("[database]\nport = 70000\n").unwrap();
        assert!(Settings::resolve(dir.path(), &cfg).is_err());
    }

    #[test]
    fn comma_separated_lists() {
        let cfg = TomlConfig::parse("[git]\nexclude = \"a, b ,,c\"\n").unwrap();
        assert_eq!(cfg.list_or("git", "exclude", &[]), vec!["a", "b", "c"]);
        assert_eq!(cfg.list_or("git", "missing", &["x"]), vec!["x"]);
    }
}
