//! Execution orchestrator.
//!
//! A run is an explicit state machine:
//!
//! ```text
//! SELECT -> DISPATCH -> VERIFY -> (RETRY -> DISPATCH | COMMIT) -> ADVANCE -> SELECT
//!    |                                   |
//!    +-> DONE | DEADLOCK                 +-> MAX_ITER_EXCEEDED
//! ```
//!
//! Within one process a single node is carried from dispatch to commit
//! before the next selection. Parallelism comes from running several
//! processes against the same repository; they coordinate only through the
//! session registry and the durable status store.

pub mod runner;
pub mod state;

pub use runner::{Collaborators, Orchestrator, OrchestratorConfig};
pub use state::{
    AttemptOutcome, ExecutionResult, RetryDecision, RetryPolicy, RunOutcome, RunState, RunSummary,
};
