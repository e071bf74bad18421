use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::utils::hash::sha256_file;

pub mod git;
pub mod mysql;
pub mod postgres;
pub mod process;
pub mod selector;

/// Result of staging and committing the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub revision: String,
    /// false when nothing was staged and `revision` is the existing head.
    pub created: bool,
}

pub trait VersionControl {
    fn name(&self) -> &'static str;

    /// Ok when the tool is installed and the root is a repository.
    fn check_available(&self) -> BackendResult<()>;

    /// Stage every tracked and untracked change outside the exclusion list.
    fn stage_all(&self) -> BackendResult<()>;

    /// Commit what is staged. With nothing staged this returns the current
    /// head with `created == false`.
    fn commit(&self, message: &str) -> BackendResult<CommitOutcome>;

    fn head(&self) -> BackendResult<String>;

    /// None when detached.
    fn current_branch(&self) -> BackendResult<Option<String>>;

    fn is_clean(&self) -> BackendResult<bool>;

    /// None when the remote is not configured.
    fn remote_url(&self, remote: &str) -> BackendResult<Option<String>>;

    fn push(&self, remote: &str, branch: &str) -> BackendResult<()>;

    fn hard_reset(&self, revision: &str) -> BackendResult<()>;

    fn revision_exists(&self, revision: &str) -> BackendResult<bool>;

    /// Check `revision` out into a new linked working copy at `path`.
    fn add_worktree(&self, revision: &str, path: &Path) -> BackendResult<()>;

    fn remove_worktree(&self, path: &Path) -> BackendResult<()>;
}

/// A dump written to disk and checked to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

pub trait DatabaseDump {
    fn name(&self) -> &'static str;

    /// Ok when both the dump and the client executables are available.
    fn check_available(&self) -> BackendResult<()>;

    /// Write a full logical dump of the configured database to `dest`.
    fn dump(&self, dest: &Path) -> BackendResult<DumpArtifact>;

    /// Load `source` into `database`, or into the configured database when None.
    fn restore(&self, source: &Path, database: Option<&str>) -> BackendResult<()>;

    fn create_database(&self, name: &str) -> BackendResult<()>;
}

/// Shared post-condition for dump writers: exit status alone is not enough,
/// the file must exist and be non-empty.
pub(crate) fn finish_dump(step: &str, dest: &Path, tool_output: String) -> BackendResult<DumpArtifact> {
    let size = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        let _ = fs::remove_file(dest);
        let mut output = String::from("dump tool exited cleanly but produced an empty file");
        if !tool_output.is_empty() {
            output.push('\n');
            output.push_str(&tool_output);
        }
        return Err(BackendError::CommandFailed { step: step.to_string(), code: Some(0), output });
    }
    let sha256 = sha256_file(dest).map_err(|e| BackendError::io(format!("hashing {}", dest.display()), e))?;
    debug!(path = %dest.display(), size, "dump written");
    Ok(DumpArtifact { path: dest.to_path_buf(), size, sha256 })
}

pub(crate) fn require_dump_file(source: &Path) -> BackendResult<()> {
    if source.is_file() {
        Ok(())
    } else {
        Err(BackendError::Validation(format!("dump file {} does not exist", source.display())))
    }
}

/// Disposable linked working copy. Removed on `remove` or, failing that, on drop.
pub struct Worktree<'a> {
    vcs: &'a dyn VersionControl,
    path: PathBuf,
    removed: bool,
    _parent: TempDir,
}

impl<'a> Worktree<'a> {
    pub fn create(vcs: &'a dyn VersionControl, revision: &str) -> BackendResult<Self> {
        let parent = tempfile::Builder::new()
            .prefix("savepoint-worktree-")
            .tempdir()
            .map_err(|e| BackendError::io("creating worktree location", e))?;
        // git refuses to check out into an existing non-empty directory
        let path = parent.path().join("tree");
        vcs.add_worktree(revision, &path)?;
        Ok(Self { vcs, path, removed: false, _parent: parent })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(mut self) -> BackendResult<()> {
        self.removed = true;
        self.vcs.remove_worktree(&self.path)
    }
}

impl Drop for Worktree<'_> {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(err) = self.vcs.remove_worktree(&self.path) {
                warn!(path = %self.path.display(), error = %err, "failed to remove worktree");
            }
        }
    }
}
