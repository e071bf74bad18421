use std::path::Path;

use super::{DatabaseDump, VersionControl, git::GitBackend, mysql::MySqlDump, postgres::PostgresDump};
use crate::config::settings::{DbDriver, Settings};

pub fn select_dump_backend(settings: &Settings) -> Box<dyn DatabaseDump> {
    match settings.database.connection.driver {
        DbDriver::Mysql => Box::new(MySqlDump::new(&settings.database)),
        DbDriver::Postgres => Box::new(PostgresDump::new(&settings.database)),
    }
}

pub fn select_vcs_backend(project_root: &Path, settings: &Settings) -> Box<dyn VersionControl> {
    Box::new(GitBackend::new(project_root, &settings.git))
}
