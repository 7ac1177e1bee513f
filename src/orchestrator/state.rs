//! Run state machine vocabulary: states, retry policy and attempt outcomes.

use crate::node::NodeId;
use crate::verify::VerifyReport;
use serde::Serialize;
use std::fmt;

/// States of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Reload status and pick the next ready node.
    Select,
    /// Hand the node to the agent.
    Dispatch,
    /// Ask the verifier about the agent's changes.
    Verify,
    /// Verification failed with budget left.
    Retry,
    /// Commit, merge and mark complete.
    Commit,
    /// Node finished; go back to `Select`.
    Advance,
    /// Every node is complete.
    Done,
    /// Nothing is ready yet nodes remain.
    Deadlock,
    /// A node used its whole retry budget.
    #[serde(rename = "MAX_ITER_EXCEEDED")]
    MaxAttemptsExceeded,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Deadlock | Self::MaxAttemptsExceeded)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Select => "SELECT",
            RunState::Dispatch => "DISPATCH",
            RunState::Verify => "VERIFY",
            RunState::Retry => "RETRY",
            RunState::Commit => "COMMIT",
            RunState::Advance => "ADVANCE",
            RunState::Done => "DONE",
            RunState::Deadlock => "DEADLOCK",
            RunState::MaxAttemptsExceeded => "MAX_ITER_EXCEEDED",
        };
        f.write_str(name)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Bounded retry with no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed per node, including the first. At least 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide after `attempts_used` failed attempts.
    pub fn decide(&self, attempts_used: u32) -> RetryDecision {
        if self.is_exhausted(attempts_used) {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry
        }
    }

    pub fn is_exhausted(&self, attempts_used: u32) -> bool {
        attempts_used >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Result of one dispatch + verify cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Passed,
    Failed { errors: Vec<String> },
}

impl From<&VerifyReport> for AttemptOutcome {
    fn from(report: &VerifyReport) -> Self {
        if report.passed {
            AttemptOutcome::Passed
        } else {
            let mut errors = report.rendered_errors();
            if errors.is_empty() {
                errors.push("verification failed without detail".to_string());
            }
            AttemptOutcome::Failed { errors }
        }
    }
}

/// Result of carrying one node to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub node: NodeId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    /// Failure detail of attempts that preceded the successful one.
    pub errors: Vec<String>,
    pub attempts: u32,
}

/// Why a run stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node in the plan is complete.
    AllComplete,
    /// The per-invocation node limit was reached first.
    NodeLimitReached,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub executed: Vec<ExecutionResult>,
    /// Every state entered, in order.
    pub history: Vec<RunState>,
}
