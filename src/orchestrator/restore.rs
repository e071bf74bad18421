use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::outcome::{OperationResult, RestoreReport, RestoreTestMode, RestoreTestReport};
use super::{SavepointOrchestrator, Session, short};
use crate::config::savepoint::{Actor, Savepoint, SavepointId};
use crate::guard::validate_revision;

impl SavepointOrchestrator<'_> {
    /// Bring the working tree and the live database back to a savepoint.
    ///
    /// Everything the restore depends on is validated before anything is
    /// touched. The optional safety backup runs next; its failure is only a
    /// warning. The working tree is reset before the database is imported, and
    /// a failed reset stops the restore before the database is touched.
    pub fn restore(&self, id: SavepointId, create_backup_first: bool) -> OperationResult<RestoreReport> {
        let session = Session::default();
        let mut result = OperationResult::new();
        let savepoint = match self.lookup(id) {
            Ok(s) => s,
            Err(e) => return result.fail(e),
        };
        info!(id, "restoring savepoint");

        let revision = self.restorable_revision(&session, &savepoint, &mut result);
        let dump = self.restorable_dump(&session, &savepoint, &mut result);
        if result.has_errors() {
            return result.finish(false);
        }

        let mut report = RestoreReport {
            savepoint_id: savepoint.id,
            safety_backup_id: None,
            revision_restored: None,
            database_restored: false,
        };

        if create_backup_first && self.settings.restore.backup_before_restore {
            let message = format!("backup before restore to: {}", savepoint.message);
            let backup = self.create_in(&session, &message, Actor::Restore);
            report.safety_backup_id = backup.data.as_ref().map(|s| s.id);
            if !backup.success {
                result.warn("safety backup failed; restoring anyway");
            }
            for e in backup.errors {
                result.warn(format!("safety backup: {}", e));
            }
            for w in backup.warnings {
                result.warn(format!("safety backup: {}", w));
            }
        } else if create_backup_first {
            debug!("safety backup disabled by configuration");
        }

        if let Some(revision) = revision {
            if let Err(e) = self.vcs.hard_reset(&revision) {
                result.error(format!("file restore failed: {}", e));
                return result.with_data(report).finish(false);
            }
            info!(revision = %short(&revision), "working tree restored");
            report.revision_restored = Some(revision);
        }

        if let Some(path) = dump {
            match self.db.restore(&path, None) {
                Ok(()) => report.database_restored = true,
                Err(e) if report.revision_restored.is_some() => result.error(format!(
                    "database restore failed: {}; the working tree is already at the savepoint revision",
                    e
                )),
                Err(e) => result.error(format!("database restore failed: {}", e)),
            }
        }

        let ok = !result.has_errors();
        result.with_data(report).finish(ok)
    }

    fn restorable_revision<T>(
        &self,
        session: &Session,
        savepoint: &Savepoint,
        result: &mut OperationResult<T>,
    ) -> Option<String> {
        let Some(revision) = &savepoint.revision_id else {
            result.warn(format!("savepoint {} has no revision; files are left as they are", savepoint.id));
            return None;
        };
        if let Err(e) = validate_revision(revision) {
            result.error(e.to_string());
            return None;
        }
        if let Err(e) = session.vcs(self.vcs) {
            result.error(format!("cannot restore files: {}", e));
            return None;
        }
        Some(revision.clone())
    }

    fn restorable_dump<T>(
        &self,
        session: &Session,
        savepoint: &Savepoint,
        result: &mut OperationResult<T>,
    ) -> Option<PathBuf> {
        let Some(stored) = &savepoint.dump_path else {
            result.warn(format!("savepoint {} has no database dump; database is left as it is", savepoint.id));
            return None;
        };
        let path = match self.checked_dump(savepoint, stored) {
            Ok(p) => p,
            Err(e) => {
                result.error(e);
                return None;
            }
        };
        if let Err(e) = session.db(self.db) {
            result.error(format!("cannot restore database: {}", e));
            return None;
        }
        Some(path)
    }

    /// Check or rehearse a restore without touching the live tree or database.
    pub fn restore_test(
        &self,
        id: SavepointId,
        mode: RestoreTestMode,
        target_dir: Option<&Path>,
        target_db: Option<&str>,
    ) -> OperationResult<RestoreTestReport> {
        let result = OperationResult::new();
        let savepoint = match self.lookup(id) {
            Ok(s) => s,
            Err(e) => return result.fail(e),
        };
        match mode {
            RestoreTestMode::DryRun => self.dry_run(&savepoint, result),
            RestoreTestMode::SeparateEnv => self.separate_env(&savepoint, target_dir, target_db, result),
        }
    }

    fn dry_run(
        &self,
        savepoint: &Savepoint,
        mut result: OperationResult<RestoreTestReport>,
    ) -> OperationResult<RestoreTestReport> {
        let session = Session::default();
        let mut report = RestoreTestReport::new(savepoint.id, RestoreTestMode::DryRun);

        if savepoint.revision_id.is_none() && savepoint.dump_path.is_none() {
            result.error(format!("savepoint {} has neither a revision nor a dump", savepoint.id));
        }

        if let Some(revision) = &savepoint.revision_id {
            let reachable = match validate_revision(revision) {
                Err(e) => {
                    result.error(e.to_string());
                    false
                }
                Ok(rev) => match session.vcs(self.vcs) {
                    Err(e) => {
                        result.error(format!("cannot verify revision: {}", e));
                        false
                    }
                    Ok(()) => match self.vcs.revision_exists(rev) {
                        Ok(true) => true,
                        Ok(false) => {
                            result.error(format!("revision {} is not reachable", short(rev)));
                            false
                        }
                        Err(e) => {
                            result.error(format!("cannot verify revision: {}", e));
                            false
                        }
                    },
                },
            };
            report.revision_reachable = Some(reachable);
        }

        if let Some(stored) = &savepoint.dump_path {
            match self.checked_dump(savepoint, stored) {
                Ok(path) => {
                    report.dump_verified = Some(true);
                    report.dump_size = std::fs::metadata(&path).ok().map(|m| m.len());
                }
                Err(e) => {
                    result.error(e);
                    report.dump_verified = Some(false);
                }
            }
        }

        let ok = !result.has_errors();
        result.with_data(report).finish(ok)
    }
}
