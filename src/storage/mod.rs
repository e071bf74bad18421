//! Append-only savepoint history kept as a JSON document under the project's
//! state directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::savepoint::{Actor, NewSavepoint, Savepoint, SavepointId};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("history file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("history file {path} has unsupported format version {version}")]
    UnsupportedVersion { path: String, version: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub actor: Option<Actor>,
    pub limit: Option<usize>,
    pub newest_first: bool,
}

pub trait HistoryStore {
    /// Persist a new row and return it with its assigned id.
    fn append(&self, record: NewSavepoint) -> Result<Savepoint, StoreError>;

    fn get(&self, id: SavepointId) -> Result<Option<Savepoint>, StoreError>;

    /// Most recent savepoint recorded for a revision.
    fn get_by_revision(&self, revision: &str) -> Result<Option<Savepoint>, StoreError>;

    fn list(&self, filter: &ListFilter) -> Result<Vec<Savepoint>, StoreError>;

    fn latest(&self) -> Result<Option<Savepoint>, StoreError> {
        let filter = ListFilter { newest_first: true, limit: Some(1), ..Default::default() };
        Ok(self.list(&filter)?.into_iter().next())
    }
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    next_id: SavepointId,
    savepoints: Vec<Savepoint>,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self { version: FORMAT_VERSION, next_id: 1, savepoints: Vec::new() }
    }
}

pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.display().to_string(), source }
    }

    fn load(&self) -> Result<HistoryFile, StoreError> {
        if !self.path.exists() {
            return Ok(HistoryFile::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        if content.trim().is_empty() {
            return Ok(HistoryFile::default());
        }
        let file: HistoryFile = serde_json::from_str(&content)
            .map_err(|source| StoreError::Corrupt { path: self.path.display().to_string(), source })?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.display().to_string(),
                version: file.version,
            });
        }
        Ok(file)
    }

    fn save(&self, file: &HistoryFile) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        let json = serde_json::to_string_pretty(file)
            .map_err(|source| StoreError::Corrupt { path: self.path.display().to_string(), source })?;
        // write then rename so a crash never leaves a truncated history
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        if cfg!(windows) && self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, record: NewSavepoint) -> Result<Savepoint, StoreError> {
        let mut file = self.load()?;
        let id = file.next_id.max(file.savepoints.iter().map(|s| s.id + 1).max().unwrap_or(1));
        let savepoint = record.into_savepoint(id);
        file.savepoints.push(savepoint.clone());
        file.next_id = id + 1;
        self.save(&file)?;
        debug!(id, "savepoint recorded");
        Ok(savepoint)
    }

    fn get(&self, id: SavepointId) -> Result<Option<Savepoint>, StoreError> {
        Ok(self.load()?.savepoints.into_iter().find(|s| s.id == id))
    }

    fn get_by_revision(&self, revision: &str) -> Result<Option<Savepoint>, StoreError> {
        Ok(self
            .load()?
            .savepoints
            .into_iter()
            .filter(|s| s.revision_id.as_deref() == Some(revision))
            .max_by_key(|s| s.id))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Savepoint>, StoreError> {
        let mut rows: Vec<Savepoint> = self
            .load()?
            .savepoints
            .into_iter()
            .filter(|s| filter.actor.map(|a| a == s.created_by).unwrap_or(true))
            .collect();
        rows.sort_by_key(|s| s.id);
        if filter.newest_first {
            rows.reverse();
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
