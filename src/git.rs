//! The version-control seam.
//!
//! Everything that touches git goes through [`GitCli`] so the worktree
//! manager can be exercised against a scripted fake. Calls are synchronous:
//! cleanup runs from `Drop`, where nothing can be awaited.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: &str) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Runs git commands.
pub trait GitCli: Send + Sync {
    /// Run `git <args>` in `cwd`. A non-zero exit is reported through
    /// [`GitOutput::success`]; `Err` means git could not be spawned at all.
    fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<GitOutput>;
}

/// Shells out to the `git` binary on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGit;

impl GitCli for SystemGit {
    fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<GitOutput> {
        debug!(cwd = %cwd.display(), args = %args.join(" "), "git");
        let output = Command::new("git").args(args).current_dir(cwd).output()?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Find the root of the main working tree containing `start`.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    let repo = git2::Repository::discover(start)
        .with_context(|| format!("No git repository found at {}", start.display()))?;
    // From inside a linked worktree, commondir points at the main .git
    let common = repo.commondir();
    let root = common
        .parent()
        .map(Path::to_path_buf)
        .or_else(|| repo.workdir().map(Path::to_path_buf))
        .context("Repository has no working directory")?;
    Ok(root)
}

/// Name of the branch currently checked out in `repo_root`, if any.
pub fn current_branch(repo_root: &Path) -> Result<Option<String>> {
    let repo = git2::Repository::open(repo_root)
        .with_context(|| format!("Failed to open git repository at {}", repo_root.display()))?;
    let head = match repo.head() {
        Ok(head) => head,
        // Unborn branch in a fresh repository
        Err(_) => return Ok(None),
    };
    Ok(head.shorthand().map(str::to_string))
}
