//! Cross-process session registry.
//!
//! The registry is the only mutable state shared between orchestrator
//! processes working on the same repository. It lives in
//! `.wavefront/sessions.json`; every call re-reads the whole file under an
//! exclusive lock on `.wavefront/sessions.lock`, applies one change and
//! swaps the result into place.

use crate::errors::RegistryError;
use crate::node::NodeId;
use crate::util::{FileLock, read_if_exists, state_dir, write_json_atomic};
use crate::worktree::WorktreeManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Done,
}

impl SessionStatus {
    /// Active and idle sessions both hold their claim.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Idle)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Done => write!(f, "done"),
        }
    }
}

/// A registered execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeId>,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

/// What a caller supplies to register a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub owner: String,
    pub role: String,
    pub node_ref: Option<NodeId>,
    pub branch: String,
    pub worktree_path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sessions: Vec<Session>,
}

/// Handle on one repository's registry file.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl SessionRegistry {
    pub fn for_repo(repo_root: &Path) -> Self {
        let dir = state_dir(repo_root);
        Self {
            path: dir.join("sessions.json"),
            lock_path: dir.join("sessions.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> Result<RegistryFile, RegistryError> {
        match read_if_exists(&self.path).map_err(|e| self.io_err(e))? {
            None => Ok(RegistryFile::default()),
            Some(content) if content.trim().is_empty() => Ok(RegistryFile::default()),
            Some(content) => {
                serde_json::from_str(&content).map_err(|source| RegistryError::Corrupt {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Read-modify-write under the registry lock.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut Vec<Session>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _lock = FileLock::acquire(&self.lock_path).map_err(|e| self.io_err(e))?;
        let mut file = self.read()?;
        let out = f(&mut file.sessions)?;
        write_json_atomic(&self.path, &file).map_err(|e| self.io_err(e))?;
        Ok(out)
    }

    /// Every session, including finished ones not yet deregistered.
    pub fn all_sessions(&self) -> Result<Vec<Session>, RegistryError> {
        let _lock = FileLock::acquire(&self.lock_path).map_err(|e| self.io_err(e))?;
        Ok(self.read()?.sessions)
    }

    /// Add a live session. The check and the write happen under one lock,
    /// so two processes can never both claim the same worktree or node.
    pub fn register(&self, info: SessionInfo) -> Result<Session, RegistryError> {
        let session = Session {
            id: info.id,
            owner: info.owner,
            role: info.role,
            node_ref: info.node_ref,
            branch: info.branch,
            worktree_path: info.worktree_path,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            pid: std::process::id(),
        };
        let registered = session.clone();
        self.modify(move |sessions| {
            if let Some(holder) = sessions
                .iter()
                .find(|s| s.status.is_live() && s.worktree_path == session.worktree_path)
            {
                return Err(RegistryError::WorktreeClaimed {
                    path: session.worktree_path.clone(),
                    session: holder.id.clone(),
                });
            }
            if let Some(node) = &session.node_ref
                && let Some(holder) = sessions
                    .iter()
                    .find(|s| s.status.is_live() && s.id != session.id && s.node_ref.as_ref() == Some(node))
            {
                return Err(RegistryError::NodeClaimed {
                    node: node.clone(),
                    session: holder.id.clone(),
                });
            }
            sessions.retain(|s| s.id != session.id);
            sessions.push(session);
            Ok(())
        })?;
        info!(session_id = %registered.id, node = ?registered.node_ref, "Registered session");
        Ok(registered)
    }

    pub fn update_status(&self, id: &str, status: SessionStatus) -> Result<(), RegistryError> {
        self.modify(|sessions| {
            let session = sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| RegistryError::SessionNotFound(id.to_string()))?;
            session.status = status;
            Ok(())
        })?;
        debug!(session_id = id, %status, "Updated session status");
        Ok(())
    }

    /// Remove a session. Removing an unknown id is not an error.
    pub fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        let removed = self.modify(|sessions| {
            let before = sessions.len();
            sessions.retain(|s| s.id != id);
            Ok(before != sessions.len())
        })?;
        if removed {
            info!(session_id = id, "Deregistered session");
        }
        Ok(())
    }

    pub fn active_sessions(&self) -> Result<Vec<Session>, RegistryError> {
        Ok(self
            .all_sessions()?
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect())
    }

    /// Whether any live session is working on `node`.
    pub fn is_node_claimed(&self, node: &NodeId) -> Result<bool, RegistryError> {
        Ok(self
            .active_sessions()?
            .iter()
            .any(|s| s.node_ref.as_ref() == Some(node)))
    }

    /// Drop every session whose worktree directory no longer exists.
    /// Returns the removed sessions.
    pub fn prune_stale(&self) -> Result<Vec<Session>, RegistryError> {
        let stale = self.modify(|sessions| {
            let (stale, keep): (Vec<Session>, Vec<Session>) = sessions
                .drain(..)
                .partition(|s| !s.worktree_path.exists());
            *sessions = keep;
            Ok(stale)
        })?;
        for session in &stale {
            info!(session_id = %session.id, path = %session.worktree_path.display(), "Pruned stale session");
        }
        Ok(stale)
    }
}

pub fn register_session(repo_root: &Path, info: SessionInfo) -> Result<Session, RegistryError> {
    SessionRegistry::for_repo(repo_root).register(info)
}

pub fn update_session_status(
    repo_root: &Path,
    id: &str,
    status: SessionStatus,
) -> Result<(), RegistryError> {
    SessionRegistry::for_repo(repo_root).update_status(id, status)
}

pub fn deregister_session(repo_root: &Path, id: &str) -> Result<(), RegistryError> {
    SessionRegistry::for_repo(repo_root).deregister(id)
}

pub fn get_active_sessions(repo_root: &Path) -> Result<Vec<Session>, RegistryError> {
    SessionRegistry::for_repo(repo_root).active_sessions()
}

pub fn is_node_claimed(repo_root: &Path, node: &NodeId) -> Result<bool, RegistryError> {
    SessionRegistry::for_repo(repo_root).is_node_claimed(node)
}

/// Scoped ownership of a session and its worktree.
///
/// Dropping the guard deregisters the session and removes the worktree, on
/// every exit path of the owning scope. Failures are logged, never raised.
/// Termination by signal bypasses this.
pub struct SessionGuard {
    repo_root: PathBuf,
    session: Session,
    registry: SessionRegistry,
    worktrees: WorktreeManager,
    released: bool,
}

impl SessionGuard {
    pub fn new(repo_root: &Path, session: Session, worktrees: WorktreeManager) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            registry: SessionRegistry::for_repo(repo_root),
            session,
            worktrees,
            released: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn worktree_path(&self) -> &Path {
        &self.session.worktree_path
    }

    pub fn set_status(&mut self, status: SessionStatus) -> Result<(), RegistryError> {
        self.registry.update_status(&self.session.id, status)?;
        self.session.status = status;
        Ok(())
    }

    /// Deregister and remove the worktree now, reporting failures.
    pub fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        self.registry.deregister(&self.session.id)?;
        self.worktrees
            .remove_worktree(&self.repo_root, &self.session.worktree_path)?;
        Ok(())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.registry.deregister(&self.session.id) {
            warn!(session_id = %self.session.id, error = %e, "Failed to deregister session");
        }
        if let Err(e) = self
            .worktrees
            .remove_worktree(&self.repo_root, &self.session.worktree_path)
        {
            warn!(session_id = %self.session.id, error = %e, "Failed to remove worktree");
        }
    }
}
