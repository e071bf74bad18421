use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use super::process::{command_failed, ensure_success, locate_executable, run, run_with_input};
use super::{DatabaseDump, DumpArtifact, finish_dump, require_dump_file};
use crate::config::settings::{DatabaseConnection, DatabaseSettings};
use crate::error::{BackendError, BackendResult};
use crate::guard::validate_database_name;

#[cfg(windows)]
const MYSQL_DIRS: &[&str] = &["C:/xampp/mysql/bin", "C:/Program Files/MySQL/MySQL Server 8.0/bin"];
#[cfg(not(windows))]
const MYSQL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/usr/local/mysql/bin", "/opt/homebrew/bin"];

/// Logical dumps through `mysqldump`, imports through the `mysql` client.
/// SQL always travels over stdin/stdout; the password through `MYSQL_PWD`.
pub struct MySqlDump {
    conn: DatabaseConnection,
    dump_bin: Option<PathBuf>,
    client_bin: Option<PathBuf>,
}

impl MySqlDump {
    pub fn new(settings: &DatabaseSettings) -> Self {
        Self {
            conn: settings.connection.clone(),
            dump_bin: locate_executable(settings.dump_binary.as_deref(), "mysqldump", MYSQL_DIRS),
            client_bin: locate_executable(settings.client_binary.as_deref(), "mysql", MYSQL_DIRS),
        }
    }

    fn command(&self, bin: &Option<PathBuf>, tool: &str) -> BackendResult<Command> {
        let bin = bin.as_ref().ok_or_else(|| BackendError::ToolNotInstalled { tool: tool.into() })?;
        let mut cmd = Command::new(bin);
        cmd.arg(format!("--host={}", self.conn.host))
            .arg(format!("--port={}", self.conn.port))
            .arg(format!("--user={}", self.conn.user))
            .arg("--default-character-set=utf8mb4");
        if let Some(pw) = &self.conn.password {
            cmd.env("MYSQL_PWD", pw);
        }
        Ok(cmd)
    }

    fn live_database(&self) -> BackendResult<&str> {
        if self.conn.database.is_empty() {
            return Err(BackendError::Validation("no database name configured".into()));
        }
        validate_database_name(&self.conn.database).map_err(|e| BackendError::Validation(e.to_string()))
    }

    pub(crate) fn dump_command(&self) -> BackendResult<Command> {
        let db = self.live_database()?.to_string();
        let mut cmd = self.command(&self.dump_bin, "mysqldump")?;
        cmd.args(["--single-transaction", "--routines", "--triggers", "--add-drop-table"]).arg(db);
        Ok(cmd)
    }

    pub(crate) fn import_command(&self, database: &str) -> BackendResult<Command> {
        let mut cmd = self.command(&self.client_bin, "mysql")?;
        cmd.arg(database);
        Ok(cmd)
    }
}

impl DatabaseDump for MySqlDump {
    fn name(&self) -> &'static str { "mysql" }

    fn check_available(&self) -> BackendResult<()> {
        if self.dump_bin.is_none() {
            return Err(BackendError::ToolNotInstalled { tool: "mysqldump".into() });
        }
        if self.client_bin.is_none() {
            return Err(BackendError::ToolNotInstalled { tool: "mysql".into() });
        }
        Ok(())
    }

    fn dump(&self, dest: &Path) -> BackendResult<DumpArtifact> {
        let mut cmd = self.dump_command()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BackendError::io(format!("creating {}", parent.display()), e))?;
        }
        let file = File::create(dest).map_err(|e| BackendError::io(format!("creating {}", dest.display()), e))?;
        cmd.stdout(Stdio::from(file));

        let out = match run("mysqldump", &mut cmd) {
            Ok(out) => out,
            Err(err) => {
                let _ = fs::remove_file(dest);
                return Err(err);
            }
        };
        if !out.success() {
            let _ = fs::remove_file(dest);
            return Err(command_failed("mysqldump", &out));
        }
        finish_dump("mysqldump", dest, out.combined())
    }

    fn restore(&self, source: &Path, database: Option<&str>) -> BackendResult<()> {
        require_dump_file(source)?;
        let db = match database {
            Some(name) => validate_database_name(name).map_err(|e| BackendError::Validation(e.to_string()))?,
            None => self.live_database()?,
        };
        let input = File::open(source).map_err(|e| BackendError::io(format!("opening {}", source.display()), e))?;
        let mut cmd = self.import_command(db)?;
        cmd.stdin(Stdio::from(input));
        let out = run("mysql import", &mut cmd)?;
        ensure_success("mysql import", out)?;
        info!(database = %db, source = %source.display(), "dump imported");
        Ok(())
    }

    fn create_database(&self, name: &str) -> BackendResult<()> {
        let name = validate_database_name(name).map_err(|e| BackendError::Validation(e.to_string()))?;
        let sql = format!("CREATE DATABASE IF NOT EXISTS `{}` DEFAULT CHARACTER SET utf8mb4;\n", name);
        let mut cmd = self.command(&self.client_bin, "mysql")?;
        run_with_input("mysql create database", &mut cmd, sql.as_bytes())?;
        info!(database = %name, "database ensured");
        Ok(())
    }
}
