use serde::Serialize;
use tracing::{error, warn};

use crate::config::savepoint::SavepointId;

/// What every public operation hands back: an overall verdict, the warnings
/// and errors collected on the way, and an optional payload.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub data: Option<T>,
}

impl<T> Default for OperationResult<T> {
    fn default() -> Self {
        Self { success: false, warnings: Vec::new(), errors: Vec::new(), data: None }
    }
}

impl<T> OperationResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Record a terminal error and close the result as failed.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.error(message);
        self.success = false;
        self
    }

    pub fn finish(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestoreReport {
    pub savepoint_id: SavepointId,
    pub safety_backup_id: Option<SavepointId>,
    pub revision_restored: Option<String>,
    pub database_restored: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RestoreTestMode {
    /// Check that the revision and dump are present without changing anything.
    DryRun,
    /// Rebuild the savepoint into a separate directory and database.
    SeparateEnv,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestoreTestReport {
    pub savepoint_id: SavepointId,
    pub mode: RestoreTestMode,
    pub revision_reachable: Option<bool>,
    pub dump_verified: Option<bool>,
    pub dump_size: Option<u64>,
    pub target_dir: Option<String>,
    pub target_db: Option<String>,
    pub files_copied: usize,
    pub config_rewritten: bool,
}

impl RestoreTestReport {
    pub fn new(savepoint_id: SavepointId, mode: RestoreTestMode) -> Self {
        Self {
            savepoint_id,
            mode,
            revision_reachable: None,
            dump_verified: None,
            dump_size: None,
            target_dir: None,
            target_db: None,
            files_copied: 0,
            config_rewritten: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub project_root: String,
    pub vcs: String,
    /// Why version control cannot be used, if it cannot.
    pub vcs_unavailable: Option<String>,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub clean: Option<bool>,
    pub database: String,
    pub database_unavailable: Option<String>,
    pub latest_savepoint: Option<SavepointId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_and_errors_are_kept_apart() {
        let mut r: OperationResult<()> = OperationResult::new();
        r.warn("push failed");
        r.error("dump failed");
        let r = r.finish(true);
        assert!(r.success);
        assert_eq!(r.warnings, vec!["push failed"]);
        assert_eq!(r.errors, vec!["dump failed"]);

        let failed: OperationResult<()> = OperationResult::new().fail("savepoint 7 not found");
        assert!(!failed.success);
        assert!(failed.has_errors());
    }

    #[test]
    fn serializes_for_callers() {
        let r = OperationResult::new().with_data(RestoreTestReport::new(3, RestoreTestMode::DryRun)).finish(true);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["mode"], "dry_run");
        assert_eq!(json["data"]["savepoint_id"], 3);
    }
}
