//! Execution context handed to the agent for one attempt.
//!
//! The context is narrow on purpose: a short project summary, the role
//! instructions, this node's description, the session it runs in and the
//! failure detail of earlier attempts. Other nodes and run history are left
//! out so the prompt size stays bounded.

use crate::node::NodeSpec;
use crate::session::Session;
use std::fmt::Write;
use std::path::Path;
use tracing::warn;

/// Upper bound on the project summary, in characters.
pub const MAX_PROJECT_CONTEXT_CHARS: usize = 4000;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    role: String,
    role_instructions: String,
    project_context: Option<String>,
    node_id: String,
    node_name: String,
    node_description: String,
    branch: Option<String>,
    worktree: Option<String>,
    attempt: u32,
    max_attempts: u32,
    prior_failures: Vec<String>,
}

impl ExecutionContext {
    pub fn for_node(node: &NodeSpec) -> Self {
        Self {
            node_id: node.id.to_string(),
            node_name: node.name.clone(),
            node_description: node.description.clone(),
            attempt: 1,
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: &str, instructions: &str) -> Self {
        self.role = role.to_string();
        self.role_instructions = instructions.to_string();
        self
    }

    /// Attach a project summary, truncated to [`MAX_PROJECT_CONTEXT_CHARS`].
    pub fn with_project_context(mut self, summary: &str) -> Self {
        let summary = summary.trim();
        if summary.is_empty() {
            return self;
        }
        let truncated: String = summary.chars().take(MAX_PROJECT_CONTEXT_CHARS).collect();
        self.project_context = Some(truncated);
        self
    }

    /// Read the project summary from a file if it exists.
    pub fn with_project_context_file(self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => self.with_project_context(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read project context");
                self
            }
        }
    }

    pub fn with_session(mut self, session: &Session) -> Self {
        self.branch = Some(session.branch.clone());
        self.worktree = Some(session.worktree_path.display().to_string());
        self
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_prior_failures(mut self, failures: &[String]) -> Self {
        self.prior_failures = failures.to_vec();
        self
    }

    pub fn prior_failures(&self) -> &[String] {
        &self.prior_failures
    }

    /// Render the prompt text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.role.is_empty() {
            let _ = writeln!(out, "# Role: {}\n", self.role);
        }
        if !self.role_instructions.is_empty() {
            let _ = writeln!(out, "{}\n", self.role_instructions.trim());
        }
        if let Some(project) = &self.project_context {
            let _ = writeln!(out, "## Project\n\n{}\n", project);
        }

        let _ = writeln!(out, "## Task {}: {}\n", self.node_id, self.node_name);
        if !self.node_description.trim().is_empty() {
            let _ = writeln!(out, "{}\n", self.node_description.trim());
        }

        let _ = writeln!(out, "## Session\n");
        if let Some(branch) = &self.branch {
            let _ = writeln!(out, "- Branch: {}", branch);
        }
        if let Some(worktree) = &self.worktree {
            let _ = writeln!(out, "- Working directory: {}", worktree);
        }
        let _ = writeln!(out, "- Attempt {} of {}", self.attempt, self.max_attempts);
        let _ = writeln!(
            out,
            "- Work only inside the working directory. Do not commit, merge or push; \
             changes are verified and committed for you.\n"
        );

        if !self.prior_failures.is_empty() {
            let _ = writeln!(out, "## Previous attempt failed verification\n");
            for failure in &self.prior_failures {
                let _ = writeln!(out, "- {}", failure);
            }
            let _ = writeln!(out, "\nFix these problems first.");
        }

        out
    }
}
