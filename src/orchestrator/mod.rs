//! Sequencing of the version-control and database backends into savepoint
//! operations.
//!
//! Operations are synchronous and assume a single caller at a time; callers
//! that can race a `create` against a `restore` must serialize them.
//! Backend failures never escape as `Err`: each one is classified as a
//! warning or an error on the returned `OperationResult`.

use chrono::{DateTime, Duration, Local};
use std::cell::OnceCell;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::savepoint::{Actor, NewSavepoint, PhaseStatus, PushStatus, Savepoint, SavepointId};
use crate::config::settings::Settings;
use crate::drivers::{DatabaseDump, DumpArtifact, VersionControl};
use crate::error::{BackendError, BackendResult};
use crate::guard::{GuardError, PathGuard, dump_file_name, sanitize_message};
use crate::storage::HistoryStore;
use crate::utils::clock::Clock;
use crate::utils::hash::verify_file;
use crate::utils::io::to_slash;

mod outcome;
mod restore;
mod sandbox;


pub use outcome::{OperationResult, RestoreTestMode, StatusReport};

const MAX_DUMP_NAME_ATTEMPTS: i64 = 120;

/// Tool availability, checked at most once per public operation.
#[derive(Default)]
struct Session {
    vcs: OnceCell<BackendResult<()>>,
    db: OnceCell<BackendResult<()>>,
}

impl Session {
    fn vcs<'s>(&'s self, backend: &dyn VersionControl) -> Result<(), &'s BackendError> {
        self.vcs.get_or_init(|| backend.check_available()).as_ref().map(|_| ())
    }

    fn db<'s>(&'s self, backend: &dyn DatabaseDump) -> Result<(), &'s BackendError> {
        self.db.get_or_init(|| backend.check_available()).as_ref().map(|_| ())
    }
}

pub struct SavepointOrchestrator<'a> {
    settings: &'a Settings,
    vcs: &'a dyn VersionControl,
    db: &'a dyn DatabaseDump,
    store: &'a dyn HistoryStore,
    clock: &'a dyn Clock,
    guard: PathGuard,
}

impl<'a> SavepointOrchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        vcs: &'a dyn VersionControl,
        db: &'a dyn DatabaseDump,
        store: &'a dyn HistoryStore,
        clock: &'a dyn Clock,
    ) -> Result<Self, GuardError> {
        let guard = PathGuard::new(&settings.project_root, &settings.backup_data_dir)?;
        Ok(Self { settings, vcs, db, store, clock, guard })
    }

    /// Commit the working tree and dump the database as one savepoint.
    pub fn create(&self, message: &str, actor: Actor) -> OperationResult<Savepoint> {
        self.create_in(&Session::default(), message, actor)
    }

    fn create_in(&self, session: &Session, message: &str, actor: Actor) -> OperationResult<Savepoint> {
        let mut result = OperationResult::new();
        let message = sanitize_message(message);
        if message.is_empty() {
            return result.fail("savepoint message must not be empty");
        }
        let now = self.clock.now();
        info!(actor = %actor, "creating savepoint");

        let (filesystem_status, revision_id) = self.capture_filesystem(session, &message, &mut result);
        let push_status = if filesystem_status == PhaseStatus::Success {
            self.push_commit(&mut result)
        } else {
            PushStatus::Absent
        };
        let (database_status, dump) = self.capture_database(session, now, &mut result);

        let record = NewSavepoint {
            revision_id,
            message,
            dump_path: dump.as_ref().map(|(rel, _)| rel.clone()),
            dump_sha256: dump.as_ref().map(|(_, a)| a.sha256.clone()),
            dump_size: dump.as_ref().map(|(_, a)| a.size),
            created_by: actor,
            filesystem_status,
            database_status,
            push_status,
            created_at: now,
        };

        match self.store.append(record) {
            Ok(savepoint) => {
                let meaningful = savepoint.revision_id.is_some() || savepoint.dump_path.is_some();
                if !meaningful {
                    result.error("neither the filesystem nor the database could be captured");
                }
                info!(
                    id = savepoint.id,
                    filesystem = %savepoint.filesystem_status,
                    database = %savepoint.database_status,
                    push = %savepoint.push_status,
                    "savepoint recorded"
                );
                result.with_data(savepoint).finish(meaningful)
            }
            Err(e) => result.fail(format!("failed to record savepoint: {}", e)),
        }
    }

    fn capture_filesystem(
        &self,
        session: &Session,
        message: &str,
        result: &mut OperationResult<Savepoint>,
    ) -> (PhaseStatus, Option<String>) {
        if let Err(e) = session.vcs(self.vcs) {
            if e.is_unavailable() {
                result.warn(format!("files not captured: {}", e));
                return (PhaseStatus::Skipped, None);
            }
            result.error(format!("files not captured: {}", e));
            return (PhaseStatus::Failed, None);
        }
        match self.vcs.stage_all().and_then(|_| self.vcs.commit(message)) {
            Ok(commit) => {
                if !commit.created {
                    result.warn(format!("no changes to commit; savepoint uses current revision {}", short(&commit.revision)));
                }
                (PhaseStatus::Success, Some(commit.revision))
            }
            Err(e) => {
                result.error(format!("files not captured: {}", e));
                (PhaseStatus::Failed, None)
            }
        }
    }

    fn push_commit(&self, result: &mut OperationResult<Savepoint>) -> PushStatus {
        if !self.settings.git.auto_push {
            return PushStatus::Skipped;
        }
        let remote = &self.settings.git.remote;
        match self.vcs.remote_url(remote) {
            Ok(None) => {
                debug!(remote = %remote, "remote not configured, not pushing");
                PushStatus::Skipped
            }
            Ok(Some(_)) => match self.vcs.current_branch() {
                Ok(Some(branch)) => match self.vcs.push(remote, &branch) {
                    Ok(()) => PushStatus::Success,
                    Err(e) => {
                        result.warn(format!("push to {} failed: {}", remote, e));
                        PushStatus::Failed
                    }
                },
                Ok(None) => {
                    result.warn("HEAD is detached; commit not pushed");
                    PushStatus::Skipped
                }
                Err(e) => {
                    result.warn(format!("push to {} failed: {}", remote, e));
                    PushStatus::Failed
                }
            },
            Err(e) => {
                result.warn(format!("push to {} failed: {}", remote, e));
                PushStatus::Failed
            }
        }
    }

    fn capture_database(
        &self,
        session: &Session,
        now: DateTime<Local>,
        result: &mut OperationResult<Savepoint>,
    ) -> (PhaseStatus, Option<(String, DumpArtifact)>) {
        if let Err(e) = session.db(self.db) {
            if e.is_unavailable() {
                result.warn(format!("database not captured: {}", e));
                return (PhaseStatus::Skipped, None);
            }
            result.error(format!("database not captured: {}", e));
            return (PhaseStatus::Failed, None);
        }
        match self.dump_database(now) {
            Ok(dump) => (PhaseStatus::Success, Some(dump)),
            Err(e) => {
                result.error(format!("database not captured: {}", e));
                (PhaseStatus::Failed, None)
            }
        }
    }

    /// Dump to the first free `backup_<timestamp>.sql`, stepping the timestamp
    /// forward a second at a time so an earlier dump is never overwritten.
    fn dump_database(&self, now: DateTime<Local>) -> BackendResult<(String, DumpArtifact)> {
        let dir = self.guard.backup_dir_path();
        for offset in 0..MAX_DUMP_NAME_ATTEMPTS {
            let name = dump_file_name(now + Duration::seconds(offset));
            let dest = dir.join(&name);
            if dest.exists() {
                continue;
            }
            let artifact = self.db.dump(&dest)?;
            return Ok((self.guard.relative_dump_path(&name), artifact));
        }
        Err(BackendError::Validation(format!("no free dump filename in {}", to_slash(&dir))))
    }

    /// Run every check a stored dump path must pass before use: PathGuard,
    /// existence, and the recorded checksum when there is one.
    fn checked_dump(&self, savepoint: &Savepoint, stored: &str) -> Result<PathBuf, String> {
        let path = self
            .guard
            .resolve_dump_path(stored)
            .map_err(|e| format!("rejected dump path: {}", e))?;
        if !path.is_file() {
            return Err(format!("dump file {} is missing", stored));
        }
        if let Some(expected) = &savepoint.dump_sha256 {
            match verify_file(&path, expected) {
                Ok(true) => {}
                Ok(false) => return Err(format!("dump file {} does not match its recorded checksum", stored)),
                Err(e) => return Err(format!("dump file {} could not be read: {}", stored, e)),
            }
        }
        Ok(path)
    }

    fn lookup(&self, id: SavepointId) -> Result<Savepoint, String> {
        match self.store.get(id) {
            Ok(Some(savepoint)) => Ok(savepoint),
            Ok(None) => Err(format!("savepoint {} not found", id)),
            Err(e) => Err(format!("failed to read savepoint history: {}", e)),
        }
    }

    /// Branch, head and tool availability for the project.
    pub fn status(&self) -> OperationResult<StatusReport> {
        let session = Session::default();
        let mut result = OperationResult::new();
        let vcs_unavailable = session.vcs(self.vcs).err().map(|e| e.to_string());
        let database_unavailable = session.db(self.db).err().map(|e| e.to_string());

        let (mut branch, mut head, mut clean) = (None, None, None);
        if vcs_unavailable.is_none() {
            match self.vcs.current_branch() {
                Ok(b) => branch = b,
                Err(e) => result.warn(format!("branch unknown: {}", e)),
            }
            match self.vcs.head() {
                Ok(h) => head = Some(h),
                Err(e) => result.warn(format!("no head revision: {}", e)),
            }
            match self.vcs.is_clean() {
                Ok(c) => clean = Some(c),
                Err(e) => result.warn(format!("working tree state unknown: {}", e)),
            }
        }
        let latest_savepoint = match self.store.latest() {
            Ok(latest) => latest.map(|s| s.id),
            Err(e) => {
                result.error(format!("failed to read savepoint history: {}", e));
                None
            }
        };

        let report = StatusReport {
            project_root: to_slash(&self.settings.project_root),
            vcs: self.vcs.name().to_string(),
            vcs_unavailable,
            branch,
            head,
            clean,
            database: self.db.name().to_string(),
            database_unavailable,
            latest_savepoint,
        };
        let ok = !result.has_errors();
        result.with_data(report).finish(ok)
    }
}

pub fn short(revision: &str) -> &str {
    revision.get(..10).unwrap_or(revision)
}
