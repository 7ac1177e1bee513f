//! Git worktree lifecycle.
//!
//! Each execution attempt gets its own worktree and branch under a scratch
//! directory next to the repository:
//!
//! ```text
//! <parent of repo>/.wavefront-worktrees/<repo name>/<session id>
//! ```
//!
//! Session ids are fresh UUIDs, so paths never collide with the main tree
//! or with other sessions, including sessions in other processes.

use crate::errors::WorktreeError;
use crate::git::{GitCli, GitOutput};
use crate::util::{FileLock, state_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Directory name of the scratch root, sibling to the repository.
pub const SCRATCH_DIR: &str = ".wavefront-worktrees";

/// An isolated working copy owned by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub session_id: String,
}

/// Options for [`WorktreeManager::create_worktree`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Start point of a newly created branch. Defaults to `HEAD`.
    pub base_branch: Option<String>,
    /// Overrides the generated `<namespace>/<owner>/<slug>` branch name.
    pub branch: Option<String>,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` for a detached or bare entry.
    pub branch: Option<String>,
    pub prunable: bool,
}

/// How a worktree ended up gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// `git worktree remove` succeeded, or left nothing behind.
    Removed,
    /// git failed and the directory was deleted directly.
    ForceDeleted,
}

/// Turn free text into a branch-safe slug of at most `max_len` chars.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(max_len).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "node".to_string()
    } else {
        slug.to_string()
    }
}

/// Parse `git worktree list --porcelain`.
pub fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                ..Default::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        } else if line == "prunable" || line.starts_with("prunable ") {
            entry.prunable = true;
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Creates, merges and removes per-session worktrees.
#[derive(Clone)]
pub struct WorktreeManager {
    git: Arc<dyn GitCli>,
    namespace: String,
}

impl WorktreeManager {
    pub fn new(git: Arc<dyn GitCli>, namespace: &str) -> Self {
        Self {
            git,
            namespace: namespace.to_string(),
        }
    }

    fn git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, WorktreeError> {
        self.git
            .run(cwd, args)
            .map_err(|source| WorktreeError::Spawn {
                args: args.join(" "),
                source,
            })
    }

    /// Run git and turn a non-zero exit into [`WorktreeError::CommandFailed`].
    fn git_ok(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, WorktreeError> {
        let output = self.git(cwd, args)?;
        if output.success {
            Ok(output)
        } else {
            Err(WorktreeError::CommandFailed {
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Directory holding every worktree of `repo_root`.
    pub fn scratch_root(&self, repo_root: &Path) -> Result<PathBuf, WorktreeError> {
        let parent = repo_root
            .parent()
            .ok_or_else(|| WorktreeError::NoScratchParent(repo_root.to_path_buf()))?;
        let repo_name = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WorktreeError::NoScratchParent(repo_root.to_path_buf()))?;
        Ok(parent.join(SCRATCH_DIR).join(repo_name))
    }

    pub fn branch_name(&self, owner: &str, slug: &str) -> String {
        format!("{}/{}/{}", self.namespace, slugify(owner, 40), slug)
    }

    /// Pick the session id, branch and path of a new worktree. Nothing is
    /// created yet.
    pub fn plan_worktree(
        &self,
        repo_root: &Path,
        slug: &str,
        owner: &str,
        opts: CreateOptions,
    ) -> Result<Worktree, WorktreeError> {
        let session_id = Uuid::new_v4().to_string();
        let branch = opts
            .branch
            .unwrap_or_else(|| self.branch_name(owner, slug));
        let base_branch = opts.base_branch.unwrap_or_else(|| "HEAD".to_string());
        let path = self.scratch_root(repo_root)?.join(&session_id);
        Ok(Worktree {
            path,
            branch,
            base_branch,
            session_id,
        })
    }

    /// Create a planned worktree and its branch on disk.
    ///
    /// When the branch already exists (a previous attempt crashed after
    /// creating it) the worktree attaches to it instead.
    #[instrument(skip(self, worktree), fields(repo = %repo_root.display(), branch = %worktree.branch))]
    pub fn add_worktree(&self, repo_root: &Path, worktree: &Worktree) -> Result<(), WorktreeError> {
        let branch = worktree.branch.as_str();
        let path = &worktree.path;
        let create_failed = |stderr: String| WorktreeError::CreateFailed {
            branch: branch.to_string(),
            path: path.clone(),
            stderr,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| create_failed(e.to_string()))?;
        }
        let path_str = path.to_string_lossy().into_owned();

        let first = self.git(
            repo_root,
            &[
                "worktree",
                "add",
                "-b",
                branch,
                &path_str,
                worktree.base_branch.as_str(),
            ],
        )?;
        if !first.success {
            if !first.stderr.contains("already exists") {
                return Err(create_failed(first.stderr.trim().to_string()));
            }
            warn!(branch = %branch, "Branch already exists, attaching worktree to it");
            let second = self.git(repo_root, &["worktree", "add", &path_str, branch])?;
            if !second.success {
                return Err(create_failed(second.stderr.trim().to_string()));
            }
        }

        info!(path = %path.display(), session_id = %worktree.session_id, "Created worktree");
        Ok(())
    }

    /// Plan and create a worktree for one session.
    pub fn create_worktree(
        &self,
        repo_root: &Path,
        slug: &str,
        owner: &str,
        opts: CreateOptions,
    ) -> Result<Worktree, WorktreeError> {
        let worktree = self.plan_worktree(repo_root, slug, owner, opts)?;
        self.add_worktree(repo_root, &worktree)?;
        Ok(worktree)
    }

    /// Merge `branch` into `target_branch` in the main tree.
    ///
    /// Merges from every process on this repository are serialized through
    /// `.wavefront/merge.lock`. A conflicting merge is aborted before the
    /// error is returned so the main tree is left clean.
    #[instrument(skip(self), fields(repo = %repo_root.display()))]
    pub fn merge_worktree(
        &self,
        branch: &str,
        target_branch: &str,
        repo_root: &Path,
    ) -> Result<(), WorktreeError> {
        let lock_path = state_dir(repo_root).join("merge.lock");
        let _lock = FileLock::acquire(&lock_path).map_err(|source| WorktreeError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        let checkout = self.git(repo_root, &["checkout", target_branch])?;
        if !checkout.success {
            return Err(WorktreeError::MergeFailed {
                branch: branch.to_string(),
                target: target_branch.to_string(),
                stderr: checkout.stderr.trim().to_string(),
            });
        }

        let merge = self.git(repo_root, &["merge", "--no-ff", "--no-edit", branch])?;
        if !merge.success {
            match self.git(repo_root, &["merge", "--abort"]) {
                Ok(out) if out.success => debug!("Aborted failed merge"),
                Ok(out) => warn!(stderr = %out.stderr.trim(), "git merge --abort failed"),
                Err(e) => warn!(error = %e, "git merge --abort failed"),
            }
            let detail = if merge.stderr.trim().is_empty() {
                merge.stdout.trim().to_string()
            } else {
                merge.stderr.trim().to_string()
            };
            return Err(WorktreeError::MergeFailed {
                branch: branch.to_string(),
                target: target_branch.to_string(),
                stderr: detail,
            });
        }

        info!(branch, target_branch, "Merged worktree branch");
        Ok(())
    }

    /// Deregister a worktree from git and delete its directory.
    ///
    /// A failed prune is only logged. When `git worktree remove` fails and the
    /// directory is still there, it is deleted directly; the call succeeds
    /// only if the directory is gone afterwards.
    #[instrument(skip(self), fields(repo = %repo_root.display()))]
    pub fn remove_worktree(
        &self,
        repo_root: &Path,
        worktree_path: &Path,
    ) -> Result<RemoveOutcome, WorktreeError> {
        let path_str = worktree_path.to_string_lossy().into_owned();
        let removed = match self.git(repo_root, &["worktree", "remove", "--force", &path_str]) {
            Ok(out) if out.success => true,
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "git worktree remove failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "git worktree remove failed");
                false
            }
        };

        self.prune(repo_root);

        if removed || !worktree_path.exists() {
            debug!(path = %worktree_path.display(), "Removed worktree");
            return Ok(RemoveOutcome::Removed);
        }

        warn!(path = %worktree_path.display(), "Falling back to direct deletion");
        let fallback = std::fs::remove_dir_all(worktree_path);
        if worktree_path.exists() {
            let reason = match fallback {
                Err(e) => e.to_string(),
                Ok(()) => "directory still present after deletion".to_string(),
            };
            return Err(WorktreeError::RemoveFailed {
                path: worktree_path.to_path_buf(),
                reason,
            });
        }
        Ok(RemoveOutcome::ForceDeleted)
    }

    /// `git worktree prune`, best effort.
    pub fn prune(&self, repo_root: &Path) {
        match self.git(repo_root, &["worktree", "prune"]) {
            Ok(out) if out.success => {}
            Ok(out) => warn!(stderr = %out.stderr.trim(), "git worktree prune failed"),
            Err(e) => warn!(error = %e, "git worktree prune failed"),
        }
    }

    pub fn list_worktrees(&self, repo_root: &Path) -> Result<Vec<WorktreeEntry>, WorktreeError> {
        let output = self.git_ok(repo_root, &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&output.stdout))
    }

    /// True when `path` exists on disk and git knows it as a worktree.
    pub fn is_worktree_valid(&self, repo_root: &Path, path: &Path) -> Result<bool, WorktreeError> {
        if !path.exists() {
            return Ok(false);
        }
        let entries = self.list_worktrees(repo_root)?;
        Ok(entries.iter().any(|e| same_path(&e.path, path)))
    }

    /// Stage and commit everything in a worktree.
    ///
    /// Returns the new commit sha, or `None` when there was nothing to
    /// commit.
    #[instrument(skip(self, message), fields(path = %worktree_path.display()))]
    pub fn commit_all(
        &self,
        worktree_path: &Path,
        message: &str,
    ) -> Result<Option<String>, WorktreeError> {
        self.git_ok(worktree_path, &["add", "-A"])?;
        let status = self.git_ok(worktree_path, &["status", "--porcelain"])?;
        if status.stdout.trim().is_empty() {
            debug!("Nothing to commit");
            return Ok(None);
        }
        self.git_ok(worktree_path, &["commit", "-m", message])?;
        let head = self.git_ok(worktree_path, &["rev-parse", "HEAD"])?;
        let sha = head.stdout.trim().to_string();
        info!(commit = %sha, "Committed worktree changes");
        Ok(Some(sha))
    }

    /// Push `branch` to `remote`.
    pub fn publish(&self, repo_root: &Path, branch: &str, remote: &str) -> Result<(), WorktreeError> {
        self.git_ok(repo_root, &["push", remote, branch])?;
        info!(branch, remote, "Published branch");
        Ok(())
    }
}
