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
const PG_DIRS: &[&str] = &["C:/Program Files/PostgreSQL/16/bin", "C:/Program Files/PostgreSQL/15/bin"];
#[cfg(not(windows))]
const PG_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin", "/usr/local/pgsql/bin"];

/// Plain-format dumps through `pg_dump`, imports through `psql`.
pub struct PostgresDump {
    conn: DatabaseConnection,
    dump_bin: Option<PathBuf>,
    client_bin: Option<PathBuf>,
}

impl PostgresDump {
    pub fn new(settings: &DatabaseSettings) -> Self {
        Self {
            conn: settings.connection.clone(),
            dump_bin: locate_executable(settings.dump_binary.as_deref(), "pg_dump", PG_DIRS),
            client_bin: locate_executable(settings.client_binary.as_deref(), "psql", PG_DIRS),
        }
    }

    fn command(&self, bin: &Option<PathBuf>, tool: &str, database: &str) -> BackendResult<Command> {
        let bin = bin.as_ref().ok_or_else(|| BackendError::ToolNotInstalled { tool: tool.into() })?;
        let mut cmd = Command::new(bin);
        cmd.arg(format!("--host={}", self.conn.host))
            .arg(format!("--port={}", self.conn.port))
            .arg(format!("--username={}", self.conn.user))
            .arg("--no-password")
            .arg(format!("--dbname={}", database));
        if let Some(pw) = &self.conn.password {
            cmd.env("PGPASSWORD", pw);
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
        let db = self.live_database()?;
        let mut cmd = self.command(&self.dump_bin, "pg_dump", db)?;
        cmd.args(["--format=plain", "--clean", "--if-exists", "--no-owner", "--no-privileges"]);
        Ok(cmd)
    }

    fn psql(&self, database: &str) -> BackendResult<Command> {
        let mut cmd = self.command(&self.client_bin, "psql", database)?;
        cmd.args(["--quiet", "--set=ON_ERROR_STOP=1"]);
        Ok(cmd)
    }
}

impl DatabaseDump for PostgresDump {
    fn name(&self) -> &'static str { "postgres" }

    fn check_available(&self) -> BackendResult<()> {
        if self.dump_bin.is_none() {
            return Err(BackendError::ToolNotInstalled { tool: "pg_dump".into() });
        }
        if self.client_bin.is_none() {
            return Err(BackendError::ToolNotInstalled { tool: "psql".into() });
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

        let out = run("pg_dump", &mut cmd).inspect_err(|_| {
            let _ = fs::remove_file(dest);
        })?;
        if !out.success() {
            let _ = fs::remove_file(dest);
            return Err(command_failed("pg_dump", &out));
        }
        finish_dump("pg_dump", dest, out.combined())
    }

    fn restore(&self, source: &Path, database: Option<&str>) -> BackendResult<()> {
        require_dump_file(source)?;
        let db = match database {
            Some(name) => validate_database_name(name).map_err(|e| BackendError::Validation(e.to_string()))?,
            None => self.live_database()?,
        };
        let input = File::open(source).map_err(|e| BackendError::io(format!("opening {}", source.display()), e))?;
        let mut cmd = self.psql(db)?;
        cmd.stdin(Stdio::from(input));
        ensure_success("psql import", run("psql import", &mut cmd)?)?;
        info!(database = %db, source = %source.display(), "dump imported");
        Ok(())
    }

    fn create_database(&self, name: &str) -> BackendResult<()> {
        let name = validate_database_name(name).map_err(|e| BackendError::Validation(e.to_string()))?;
        let mut lookup_cmd = self.psql("postgres")?;
        lookup_cmd.args(["--tuples-only", "--no-align"]);
        let lookup = format!("SELECT 1 FROM pg_database WHERE datname = '{}';\n", name);
        let exists = run_with_input("psql database lookup", &mut lookup_cmd, lookup.as_bytes())?;
        if exists.stdout.trim() == "1" {
            info!(database = %name, "database already exists");
            return Ok(());
        }
        let mut create = self.psql("postgres")?;
        let sql = format!("CREATE DATABASE \"{}\";\n", name);
        run_with_input("psql create database", &mut create, sql.as_bytes())?;
        info!(database = %name, "database created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DbDriver;
    use tempfile::TempDir;

    fn settings(dump: Option<String>, client: Option<String>) -> DatabaseSettings {
        DatabaseSettings {
            connection: DatabaseConnection {
                driver: DbDriver::Postgres,
                host: "localhost".into(),
                port: 5432,
                user: "app".into(),
                password: Some("hunter2".into()),
                database: "app".into(),
            },
            dump_binary: dump,
            client_binary: Some(client.unwrap_or_else(|| "/nonexistent/psql".into())),
        }
    }

    #[test]
    fn dump_command_targets_live_database() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("pg_dump");
        fs::write(&fake, "").unwrap();
        let backend = PostgresDump::new(&settings(Some(fake.to_string_lossy().into_owned()), None));
        let argv: Vec<String> = backend
            .dump_command()
            .unwrap()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(argv.contains(&"--dbname=app".to_string()));
        assert!(argv.contains(&"--no-password".to_string()));
        assert!(argv.contains(&"--clean".to_string()));
        assert!(!argv.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn missing_client_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("pg_dump");
        fs::write(&fake, "").unwrap();
        let backend = PostgresDump::new(&settings(Some(fake.to_string_lossy().into_owned()), None));
        match backend.check_available() {
            Err(BackendError::ToolNotInstalled { tool }) => assert_eq!(tool, "psql"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn live_database_name_is_validated() {
        let mut s = settings(None, None);
        s.connection.database = "app; DROP".into();
        let backend = PostgresDump::new(&s);
        assert!(matches!(backend.dump_command(), Err(BackendError::Validation(_))));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// A `psql` that appends its target database and stdin to `log`, and
    /// answers database lookups with `lookup_answer`.
    #[cfg(unix)]
    fn logging_psql(dir: &Path, log: &Path, lookup_answer: &str) -> String {
        script(
            dir,
            "psql",
            &format!(
                "input=$(cat)\n\
                 for a in \"$@\"; do case \"$a\" in --dbname=*) echo \"$a\" >> '{0}';; esac; done\n\
                 printf '%s\\n' \"$input\" >> '{0}'\n\
                 case \"$input\" in SELECT*) echo '{1}';; esac",
                log.display(),
                lookup_answer
            ),
        )
    }

    #[cfg(unix)]
    #[test]
    fn dump_streams_stdout_into_file() {
        let dir = TempDir::new().unwrap();
        let dump = script(dir.path(), "pg_dump", r#"printf 'CREATE TABLE orders (id INT);\n-- pw=%s\n' "$PGPASSWORD""#);
        let backend = PostgresDump::new(&settings(Some(dump), None));
        let dest = dir.path().join("backups/backup_2024-01-01_00-00-00.sql");

        let artifact = backend.dump(&dest).unwrap();
        let content = fs::read_to_string(&dest).unwrap();
        assert_eq!(content, "CREATE TABLE orders (id INT);\n-- pw=hunter2\n");
        assert_eq!(artifact.size, content.len() as u64);
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_with_clean_exit_fails() {
        let dir = TempDir::new().unwrap();
        let dump = script(dir.path(), "pg_dump", "exit 0");
        let backend = PostgresDump::new(&settings(Some(dump), None));
        let dest = dir.path().join("backup_2024-01-01_00-00-00.sql");
        assert!(matches!(backend.dump(&dest), Err(BackendError::CommandFailed { code: Some(0), .. })));
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    #[test]
    fn restore_feeds_dump_to_target_database() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("psql.log");
        let client = logging_psql(dir.path(), &log, "");
        let backend = PostgresDump::new(&settings(None, Some(client)));
        let source = dir.path().join("backup_2024-01-01_00-00-00.sql");
        fs::write(&source, "INSERT INTO orders VALUES (1);\n").unwrap();

        backend.restore(&source, Some("test_restore_1")).unwrap();
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains("--dbname=test_restore_1"));
        assert!(logged.contains("INSERT INTO orders VALUES (1);"));

        assert!(matches!(
            backend.restore(&dir.path().join("missing.sql"), None),
            Err(BackendError::Validation(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn create_database_skips_existing() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("psql.log");
        let client = logging_psql(dir.path(), &log, " 1");
        let backend = PostgresDump::new(&settings(None, Some(client)));

        backend.create_database("test_restore_1").unwrap();
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains("--dbname=postgres"));
        assert!(logged.contains("WHERE datname = 'test_restore_1'"));
        assert!(!logged.contains("CREATE DATABASE"));
    }

    #[cfg(unix)]
    #[test]
    fn create_database_creates_missing() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("psql.log");
        let client = logging_psql(dir.path(), &log, "");
        let backend = PostgresDump::new(&settings(None, Some(client)));

        backend.create_database("test_restore_1").unwrap();
        assert!(fs::read_to_string(&log).unwrap().contains("CREATE DATABASE \"test_restore_1\";"));
        assert!(matches!(backend.create_database("bad name"), Err(BackendError::Validation(_))));
    }
}
