use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type SavepointId = u64;

/// One recorded recovery point: a commit of the working tree plus a logical
/// database dump, taken together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Savepoint {
    pub id: SavepointId,
    pub revision_id: Option<String>,
    pub message: String,
    /// Relative to the project root, e.g. `backups/backup_2024-01-01_00-00-00.sql`.
    pub dump_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_size: Option<u64>,
    pub created_by: Actor,
    pub filesystem_status: PhaseStatus,
    pub database_status: PhaseStatus,
    pub push_status: PushStatus,
    pub created_at: DateTime<Local>,
}

/// Everything but the id; handed to the history store, which assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSavepoint {
    pub revision_id: Option<String>,
    pub message: String,
    pub dump_path: Option<String>,
    pub dump_sha256: Option<String>,
    pub dump_size: Option<u64>,
    pub created_by: Actor,
    pub filesystem_status: PhaseStatus,
    pub database_status: PhaseStatus,
    pub push_status: PushStatus,
    pub created_at: DateTime<Local>,
}

impl NewSavepoint {
    pub fn into_savepoint(self, id: SavepointId) -> Savepoint {
        Savepoint {
            id,
            revision_id: self.revision_id,
            message: self.message,
            dump_path: self.dump_path,
            dump_sha256: self.dump_sha256,
            dump_size: self.dump_size,
            created_by: self.created_by,
            filesystem_status: self.filesystem_status,
            database_status: self.database_status,
            push_status: self.push_status,
            created_at: self.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Web,
    Cli,
    /// Safety backup taken right before a restore.
    Restore,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Success,
    Failed,
    /// Remote missing or auto-push disabled.
    Skipped,
    /// No commit was produced, so there was nothing to push.
    Absent,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Actor::Web => "web",
            Actor::Cli => "cli",
            Actor::Restore => "restore",
        })
    }
}

impl std::str::FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Actor::Web),
            "cli" => Ok(Actor::Cli),
            "restore" => Ok(Actor::Restore),
            other => Err(format!("unknown actor '{}'", other)),
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        })
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PushStatus::Success => "success",
            PushStatus::Failed => "failed",
            PushStatus::Skipped => "skipped",
            PushStatus::Absent => "absent",
        })
    }
}
