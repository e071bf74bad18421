use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::process::{command_failed, locate_executable, run, run_checked};
use super::{CommitOutcome, VersionControl};
use crate::config::settings::GitSettings;
use crate::error::{BackendError, BackendResult};
use crate::guard::validate_revision;
use crate::utils::io::{absolute, to_slash};

#[cfg(windows)]
const GIT_DIRS: &[&str] = &["C:/Program Files/Git/cmd", "C:/Program Files/Git/bin"];
#[cfg(not(windows))]
const GIT_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// `VersionControl` over the git command line. Every call runs
/// `git -C <root>` with the root made absolute and slash-normalized.
pub struct GitBackend {
    binary: Option<PathBuf>,
    root: String,
    exclude: Vec<String>,
    author_name: Option<String>,
    author_email: Option<String>,
}

impl GitBackend {
    pub fn new(root: &Path, settings: &GitSettings) -> Self {
        let root = absolute(root).map(|p| to_slash(&p)).unwrap_or_else(|_| to_slash(root));
        Self {
            binary: locate_executable(settings.binary.as_deref(), "git", GIT_DIRS),
            root,
            exclude: settings.exclude.clone(),
            author_name: settings.author_name.clone(),
            author_email: settings.author_email.clone(),
        }
    }

    fn git(&self) -> BackendResult<Command> {
        let bin = self.binary.as_ref().ok_or_else(|| BackendError::ToolNotInstalled { tool: "git".into() })?;
        let mut cmd = Command::new(bin);
        cmd.arg("-C").arg(&self.root);
        // keep output parseable regardless of the operator's locale
        cmd.env("LC_ALL", "C");
        Ok(cmd)
    }

    fn stdout(&self, step: &str, args: &[&str]) -> BackendResult<String> {
        let out = run_checked(step, self.git()?.args(args))?;
        Ok(out.stdout.trim().to_string())
    }

    fn exclude_pathspecs(&self) -> Vec<String> {
        self.exclude
            .iter()
            .map(|e| e.replace('\\', "/"))
            .filter(|e| !e.is_empty())
            .map(|e| format!(":(exclude){}", e))
            .collect()
    }
}

impl VersionControl for GitBackend {
    fn name(&self) -> &'static str { "git" }

    fn check_available(&self) -> BackendResult<()> {
        let out = run("git rev-parse --is-inside-work-tree", self.git()?.args(["rev-parse", "--is-inside-work-tree"]))?;
        if out.success() && out.stdout.trim() == "true" {
            Ok(())
        } else {
            Err(BackendError::NotARepository { path: self.root.clone() })
        }
    }

    fn stage_all(&self) -> BackendResult<()> {
        let mut cmd = self.git()?;
        cmd.args(["add", "--all", "--", "."]).args(self.exclude_pathspecs());
        run_checked("git add", &mut cmd)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> BackendResult<CommitOutcome> {
        // exit 0: nothing staged, exit 1: staged changes
        let diff = run("git diff --cached", self.git()?.args(["diff", "--cached", "--quiet"]))?;
        match diff.code {
            Some(0) => {
                let revision = self.head()?;
                debug!(revision = %revision, "nothing staged, reusing head");
                return Ok(CommitOutcome { revision, created: false });
            }
            Some(1) => {}
            _ => return Err(command_failed("git diff --cached", &diff)),
        }

        let mut cmd = self.git()?;
        if let Some(name) = &self.author_name {
            cmd.arg("-c").arg(format!("user.name={}", name));
        }
        if let Some(email) = &self.author_email {
            cmd.arg("-c").arg(format!("user.email={}", email));
        }
        cmd.args(["commit", "--quiet", "--no-verify", "-m", message]);
        run_checked("git commit", &mut cmd)?;

        let revision = self.head()?;
        info!(revision = %revision, "created commit");
        Ok(CommitOutcome { revision, created: true })
    }

    fn head(&self) -> BackendResult<String> {
        self.stdout("git rev-parse HEAD", &["rev-parse", "HEAD"])
    }

    fn current_branch(&self) -> BackendResult<Option<String>> {
        let branch = self.stdout("git rev-parse --abbrev-ref HEAD", &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(if branch == "HEAD" || branch.is_empty() { None } else { Some(branch) })
    }

    fn is_clean(&self) -> BackendResult<bool> {
        let mut cmd = self.git()?;
        cmd.args(["status", "--porcelain", "--", "."]).args(self.exclude_pathspecs());
        let out = run_checked("git status", &mut cmd)?;
        Ok(out.stdout.trim().is_empty())
    }

    fn remote_url(&self, remote: &str) -> BackendResult<Option<String>> {
        if remote.is_empty() || remote.starts_with('-') {
            return Ok(None);
        }
        let out = run("git remote get-url", self.git()?.args(["remote", "get-url", remote]))?;
        let url = out.stdout.trim();
        Ok(if out.success() && !url.is_empty() { Some(url.to_string()) } else { None })
    }

    fn push(&self, remote: &str, branch: &str) -> BackendResult<()> {
        if remote.starts_with('-') || branch.starts_with('-') {
            return Err(BackendError::Validation(format!("refusing to push '{}' to '{}'", branch, remote)));
        }
        run_checked("git push", self.git()?.args(["push", remote, branch]))?;
        info!(remote = %remote, branch = %branch, "pushed");
        Ok(())
    }

    fn hard_reset(&self, revision: &str) -> BackendResult<()> {
        let revision = validate_revision(revision).map_err(|e| BackendError::Validation(e.to_string()))?;
        run_checked("git reset --hard", self.git()?.args(["reset", "--hard", "--quiet", revision]))?;
        info!(revision = %revision, "working tree reset");
        Ok(())
    }

    fn revision_exists(&self, revision: &str) -> BackendResult<bool> {
        let revision = validate_revision(revision).map_err(|e| BackendError::Validation(e.to_string()))?;
        let object = format!("{}^{{commit}}", revision);
        let out = run("git cat-file -e", self.git()?.args(["cat-file", "-e", object.as_str()]))?;
        Ok(out.success())
    }

    fn add_worktree(&self, revision: &str, path: &Path) -> BackendResult<()> {
        let revision = validate_revision(revision).map_err(|e| BackendError::Validation(e.to_string()))?;
        let target = to_slash(path);
        run_checked(
            "git worktree add",
            self.git()?.args(["worktree", "add", "--detach", "--quiet", target.as_str(), revision]),
        )?;
        debug!(path = %target, revision = %revision, "worktree added");
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> BackendResult<()> {
        let target = to_slash(path);
        let removed = run_checked("git worktree remove", self.git()?.args(["worktree", "remove", "--force", target.as_str()]));
        // prune either way so a half-removed entry does not linger in .git/worktrees
        let _ = run("git worktree prune", self.git()?.args(["worktree", "prune"]));
        removed.map(|_| debug!(path = %target, "worktree removed"))
    }
}
