use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::outcome::{OperationResult, RestoreTestMode, RestoreTestReport};
use super::{SavepointOrchestrator, Session};
use crate::config::savepoint::Savepoint;
use crate::drivers::Worktree;
use crate::guard::{validate_database_name, validate_revision};
use crate::utils::io::{absolute, copy_tree_excluding_vcs, is_dir_empty, paths_overlap, to_slash};

impl SavepointOrchestrator<'_> {
    /// Rebuild a savepoint into `target_dir` and `target_db`. The live tree
    /// and database are only read from.
    pub(super) fn separate_env(
        &self,
        savepoint: &Savepoint,
        target_dir: Option<&Path>,
        target_db: Option<&str>,
        mut result: OperationResult<RestoreTestReport>,
    ) -> OperationResult<RestoreTestReport> {
        let session = Session::default();
        let mut report = RestoreTestReport::new(savepoint.id, RestoreTestMode::SeparateEnv);

        let target = match target_dir {
            Some(dir) => self.checked_target_dir(dir, &mut result),
            None => {
                result.error("separate_env requires a target directory");
                None
            }
        };
        let database = match target_db {
            Some(name) => match validate_database_name(name) {
                Ok(n) if n == self.settings.database.connection.database => {
                    result.error(format!("target database '{}' is the live database", n));
                    None
                }
                Ok(n) => Some(n.to_string()),
                Err(e) => {
                    result.error(e.to_string());
                    None
                }
            },
            None => {
                result.error("separate_env requires a target database name");
                None
            }
        };

        let revision = match &savepoint.revision_id {
            Some(rev) => match validate_revision(rev) {
                Ok(rev) => Some(rev.to_string()),
                Err(e) => {
                    result.error(e.to_string());
                    None
                }
            },
            None => {
                result.error(format!("savepoint {} has no revision to check out", savepoint.id));
                None
            }
        };
        if revision.is_some() {
            if let Err(e) = session.vcs(self.vcs) {
                result.error(format!("cannot check out revision: {}", e));
            }
        }

        // the target database is created even when there is nothing to import
        if let Err(e) = session.db(self.db) {
            result.error(format!("cannot create target database: {}", e));
        }
        let dump = match &savepoint.dump_path {
            Some(stored) => match self.checked_dump(savepoint, stored) {
                Ok(path) => Some(path),
                Err(e) => {
                    result.error(e);
                    None
                }
            },
            None => {
                result.warn(format!("savepoint {} has no database dump; target database left empty", savepoint.id));
                None
            }
        };

        let (Some(target), Some(database), Some(revision)) = (target, database, revision) else {
            return result.with_data(report).finish(false);
        };
        if result.has_errors() {
            return result.with_data(report).finish(false);
        }
        report.target_dir = Some(to_slash(&target));
        report.target_db = Some(database.clone());

        let worktree = match Worktree::create(self.vcs, &revision) {
            Ok(wt) => wt,
            Err(e) => return result.fail(format!("could not check out revision: {}", e)).with_data(report),
        };
        let copied = copy_tree_excluding_vcs(worktree.path(), &target);
        if let Err(e) = worktree.remove() {
            result.warn(format!("temporary working copy not removed cleanly: {}", e));
        }
        match copied {
            Ok(count) => report.files_copied = count,
            Err(e) => return result.fail(format!("copying files to {} failed: {}", to_slash(&target), e)).with_data(report),
        }
        info!(target = %to_slash(&target), files = report.files_copied, "savepoint files copied");

        if let Err(e) = self.db.create_database(&database) {
            return result.fail(format!("creating database {} failed: {}", database, e)).with_data(report);
        }
        if let Some(path) = dump {
            if let Err(e) = self.db.restore(&path, Some(&database)) {
                return result.fail(format!("importing dump into {} failed: {}", database, e)).with_data(report);
            }
            info!(database = %database, "dump imported into target database");
        }

        let config_file = target.join(&self.settings.restore.config_file);
        if !config_file.is_file() {
            result.warn(format!(
                "no database configuration at {}; point the copy at {} manually",
                to_slash(&config_file),
                database
            ));
        } else {
            match rewrite_config_value(&config_file, &self.settings.restore.config_key, &database) {
                Ok(true) => report.config_rewritten = true,
                Ok(false) => result.warn(format!(
                    "{} has no {} entry; point the copy at {} manually",
                    to_slash(&config_file),
                    self.settings.restore.config_key,
                    database
                )),
                Err(e) => result.error(format!("rewriting {} failed: {}", to_slash(&config_file), e)),
            }
        }

        let ok = !result.has_errors();
        result.with_data(report).finish(ok)
    }

    fn checked_target_dir<T>(&self, dir: &Path, result: &mut OperationResult<T>) -> Option<PathBuf> {
        let (target, live) = match (absolute(dir), absolute(&self.settings.project_root)) {
            (Ok(t), Ok(l)) => (t, l),
            (Err(e), _) | (_, Err(e)) => {
                result.error(format!("cannot resolve target directory {}: {}", to_slash(dir), e));
                return None;
            }
        };
        if paths_overlap(&target, &live) {
            result.error(format!(
                "target directory {} overlaps the live project at {}",
                to_slash(&target),
                to_slash(&live)
            ));
            return None;
        }
        if target.exists() {
            if !target.is_dir() {
                result.error(format!("target {} is not a directory", to_slash(&target)));
                return None;
            }
            match is_dir_empty(&target) {
                Ok(true) => {}
                Ok(false) => {
                    result.error(format!("target directory {} is not empty", to_slash(&target)));
                    return None;
                }
                Err(e) => {
                    result.error(format!("cannot read target directory {}: {}", to_slash(&target), e));
                    return None;
                }
            }
        }
        Some(target)
    }
}

/// Point `key` at `value` in a restored configuration file. Understands
/// `KEY=value` lines (optionally quoted or exported) and PHP
/// `define('KEY', 'value')` calls. Returns false when the key is absent.
pub(crate) fn rewrite_config_value(path: &Path, key: &str, value: &str) -> std::io::Result<bool> {
    let content = fs::read_to_string(path)?;
    let key = regex::escape(key);
    let assignment = Regex::new(&format!(r#"(?m)^([ \t]*(?:export[ \t]+)?{}[ \t]*=[ \t]*)(["']?)[^"'\r\n]*(["']?)"#, key))
        .map_err(std::io::Error::other)?;
    let define = Regex::new(&format!(r#"(define\(\s*["']{}["']\s*,\s*)(["'])[^"']*(["'])"#, key))
        .map_err(std::io::Error::other)?;

    let mut rewritten = false;
    let mut updated = content.clone();
    for re in [&assignment, &define] {
        if re.is_match(&updated) {
            updated = re.replace_all(&updated, |caps: &regex::Captures| format!("{}{}{}{}", &caps[1], &caps[2], value, &caps[3])).into_owned();
            rewritten = true;
        }
    }
    if rewritten && updated != content {
        fs::write(path, updated)?;
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rewrites_env_style_assignments() {
        let dir = TempDir::new().unwrap();
        let env = dir.path().join(".env");
        fs::write(&env, "APP_ENV=prod\nDB_NAME=shop_live\nexport DB_NAME_RO = \"x\"\n  DB_NAME = 'shop_live'\n").unwrap();
        assert!(rewrite_config_value(&env, "DB_NAME", "test_restore_1").unwrap());
        assert_eq!(
            fs::read_to_string(&env).unwrap(),
            "APP_ENV=prod\nDB_NAME=test_restore_1\nexport DB_NAME_RO = \"x\"\n  DB_NAME = 'test_restore_1'\n"
        );
    }

    #[test]
    fn rewrites_php_define() {
        let dir = TempDir::new().unwrap();
        let php = dir.path().join("config.php");
        fs::write(&php, "<?php\ndefine('DB_NAME', 'shop_live');\ndefine('DB_HOST', 'localhost');\n").unwrap();
        assert!(rewrite_config_value(&php, "DB_NAME", "test_restore_1").unwrap());
        assert_eq!(
            fs::read_to_string(&php).unwrap(),
            "<?php\ndefine('DB_NAME', 'test_restore_1');\ndefine('DB_HOST', 'localhost');\n"
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let dir = TempDir::new().unwrap();
        let env = dir.path().join(".env");
        fs::write(&env, "APP_ENV=prod\n").unwrap();
        assert!(!rewrite_config_value(&env, "DB_NAME", "test_restore_1").unwrap());
        assert_eq!(fs::read_to_string(&env).unwrap(), "APP_ENV=prod\n");
    }
}
