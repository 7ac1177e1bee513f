//! Durable per-node status.
//!
//! Completion state is owned by the store, never cached in the orchestrator:
//! every read goes back to disk and every mutation is a read-modify-write
//! under an exclusive lock, so several processes can share one plan.

use crate::errors::StatusError;
use crate::node::{NodeId, NodeRecord, NodeStatus};
use crate::util::{FileLock, read_if_exists, state_dir, write_json_atomic};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Status records keyed by node id. Nodes without a record are pending.
pub type StatusMap = BTreeMap<NodeId, NodeRecord>;

/// Ids of every node recorded as complete.
pub fn completed_set(records: &StatusMap) -> HashSet<NodeId> {
    records
        .iter()
        .filter(|(_, r)| r.status.is_complete())
        .map(|(id, _)| id.clone())
        .collect()
}

/// Repository abstraction over node status.
pub trait StatusStore: Send + Sync {
    /// Read the current records.
    fn load(&self) -> Result<StatusMap, StatusError>;

    /// Atomically apply `mutate` to the current records and persist the
    /// result. Returns the records as written.
    fn update(&self, mutate: &mut dyn FnMut(&mut StatusMap)) -> Result<StatusMap, StatusError>;

    fn completed(&self) -> Result<HashSet<NodeId>, StatusError> {
        Ok(completed_set(&self.load()?))
    }

    /// Move a pending or in-progress node to in-progress. A complete node
    /// is left untouched and reported as [`StatusError::AlreadyComplete`].
    fn mark_in_progress(&self, id: &NodeId) -> Result<(), StatusError> {
        let mut already_complete = false;
        self.update(&mut |records| {
            let record = records.entry(id.clone()).or_default();
            if record.status.is_complete() {
                already_complete = true;
                return;
            }
            record.status = NodeStatus::InProgress;
            record.completed_at = None;
        })?;
        if already_complete {
            return Err(StatusError::AlreadyComplete(id.clone()));
        }
        Ok(())
    }

    /// Count a failed attempt and store the failure detail gathered so far.
    /// Returns the new count.
    fn record_failure(&self, id: &NodeId, errors: &[String]) -> Result<u32, StatusError> {
        let records = self.update(&mut |records| {
            let record = records.entry(id.clone()).or_default();
            record.attempts += 1;
            record.last_errors = errors.to_vec();
        })?;
        Ok(records.get(id).map(|r| r.attempts).unwrap_or_default())
    }

    fn mark_complete(&self, id: &NodeId) -> Result<(), StatusError> {
        self.update(&mut |records| {
            let record = records.entry(id.clone()).or_default();
            record.status = NodeStatus::Complete;
            record.completed_at = Some(Utc::now());
            record.last_errors.clear();
        })?;
        Ok(())
    }

    /// Return a node to pending with a fresh attempt budget.
    fn reset(&self, id: &NodeId) -> Result<(), StatusError> {
        self.update(&mut |records| {
            records.remove(id);
        })?;
        Ok(())
    }
}

/// Status store backed by `.wavefront/status.json`.
#[derive(Debug, Clone)]
pub struct JsonStatusStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonStatusStore {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// Store at the default location inside a repository.
    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(state_dir(repo_root).join("status.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StatusError {
        StatusError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> Result<StatusMap, StatusError> {
        match read_if_exists(&self.path).map_err(|e| self.io_err(e))? {
            None => Ok(StatusMap::new()),
            Some(content) if content.trim().is_empty() => Ok(StatusMap::new()),
            Some(content) => {
                serde_json::from_str(&content).map_err(|source| StatusError::Corrupt {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}

impl StatusStore for JsonStatusStore {
    fn load(&self) -> Result<StatusMap, StatusError> {
        let _lock = FileLock::acquire(&self.lock_path).map_err(|e| self.io_err(e))?;
        self.read()
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut StatusMap)) -> Result<StatusMap, StatusError> {
        let _lock = FileLock::acquire(&self.lock_path).map_err(|e| self.io_err(e))?;
        let mut records = self.read()?;
        mutate(&mut records);
        write_json_atomic(&self.path, &records).map_err(|e| self.io_err(e))?;
        debug!(path = %self.path.display(), nodes = records.len(), "Status store updated");
        Ok(records)
    }
}
