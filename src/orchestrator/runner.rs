use crate::agent::{Agent, AgentRequest, AgentSignal};
use crate::context::ExecutionContext;
use crate::dag::{Dag, Progress, build_dag, check_progress};
use crate::errors::{OrchestratorError, RegistryError, RunPhase, StatusError};
use crate::node::{NodeId, NodeSpec, NodeStatus};
use crate::orchestrator::state::{
    AttemptOutcome, ExecutionResult, RetryDecision, RetryPolicy, RunOutcome, RunState, RunSummary,
};
use crate::session::{SessionGuard, SessionInfo, SessionRegistry, SessionStatus};
use crate::status::{StatusMap, StatusStore, completed_set};
use crate::verify::{Gate, Verifier, VerifyRequest};
use crate::worktree::{CreateOptions, WorktreeManager, slugify};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub repo_root: PathBuf,
    /// Branch every node is merged into.
    pub feature_branch: String,
    pub owner: String,
    pub role: String,
    pub role_instructions: String,
    pub context_file: Option<PathBuf>,
    pub gates: Vec<Gate>,
    pub retry: RetryPolicy,
    /// Stop after completing this many nodes.
    pub max_nodes: Option<usize>,
    /// Push the feature branch here after each merge.
    pub remote: Option<String>,
}

/// The external collaborators a run talks to.
pub struct Collaborators {
    pub agent: Arc<dyn Agent>,
    pub verifier: Arc<dyn Verifier>,
    pub status: Arc<dyn StatusStore>,
    pub worktrees: WorktreeManager,
}

/// Drives nodes through select, dispatch, verify and commit until the plan
/// is complete or a fatal condition stops it.
pub struct Orchestrator {
    config: OrchestratorConfig,
    nodes: BTreeMap<NodeId, NodeSpec>,
    dag: Dag,
    agent: Arc<dyn Agent>,
    verifier: Arc<dyn Verifier>,
    status: Arc<dyn StatusStore>,
    worktrees: WorktreeManager,
    registry: SessionRegistry,
}

enum Selection {
    Node(NodeId),
    AllComplete,
}

enum NodeRun {
    Finished(ExecutionResult),
    /// Another process claimed or completed the node after selection.
    Lost,
}

impl Orchestrator {
    /// Validate the plan and assemble a runner. Structural plan errors
    /// surface here, before any state is touched.
    pub fn new(
        config: OrchestratorConfig,
        nodes: Vec<NodeSpec>,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        let dag = build_dag(&nodes)?;
        let registry = SessionRegistry::for_repo(&config.repo_root);
        Ok(Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            dag,
            agent: collaborators.agent,
            verifier: collaborators.verifier,
            status: collaborators.status,
            worktrees: collaborators.worktrees,
            registry,
            config,
        })
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Run until done, a node limit, or a fatal error.
    pub async fn run(&self) -> Result<RunSummary, OrchestratorError> {
        let mut history = Vec::new();
        let mut executed = Vec::new();

        loop {
            history.push(RunState::Select);
            let selection = self.select().inspect_err(|e| {
                if matches!(e, OrchestratorError::Deadlock { .. }) {
                    history.push(RunState::Deadlock);
                }
            });
            let node = match selection? {
                Selection::AllComplete => {
                    history.push(RunState::Done);
                    info!(completed = executed.len(), "All nodes complete");
                    return Ok(RunSummary {
                        outcome: RunOutcome::AllComplete,
                        executed,
                        history,
                    });
                }
                Selection::Node(node) => node,
            };

            let result = match self.execute_node(&node, &mut history).await? {
                NodeRun::Finished(result) => result,
                NodeRun::Lost => continue,
            };
            executed.push(result);
            history.push(RunState::Advance);

            if let Some(limit) = self.config.max_nodes
                && executed.len() >= limit
            {
                info!(limit, "Node limit reached");
                return Ok(RunSummary {
                    outcome: RunOutcome::NodeLimitReached,
                    executed,
                    history,
                });
            }
        }
    }

    /// Nodes that durable status forbids selecting.
    fn excluded(&self, records: &StatusMap) -> HashSet<NodeId> {
        records
            .iter()
            .filter(|(_, r)| match r.status {
                NodeStatus::Failed => true,
                NodeStatus::InProgress => self.config.retry.is_exhausted(r.attempts),
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn select(&self) -> Result<Selection, OrchestratorError> {
        let records = self
            .status
            .load()
            .map_err(|e| OrchestratorError::in_phase(RunPhase::Select, None, e))?;
        let completed = completed_set(&records);

        let ready = match check_progress(&self.dag, &completed, &self.excluded(&records)) {
            Progress::AllComplete => return Ok(Selection::AllComplete),
            Progress::Deadlock { remaining } => {
                warn!(remaining = remaining.len(), "Deadlock: no node is ready");
                return Err(OrchestratorError::Deadlock { remaining });
            }
            Progress::Ready(ready) => ready,
        };

        let claimed: HashSet<NodeId> = self
            .registry
            .active_sessions()
            .map_err(|e| OrchestratorError::in_phase(RunPhase::Select, None, e))?
            .into_iter()
            .filter_map(|s| s.node_ref)
            .collect();

        match ready.iter().find(|id| !claimed.contains(*id)) {
            Some(node) => {
                info!(node = %node, ready = ready.len(), "Selected node");
                Ok(Selection::Node(node.clone()))
            }
            None => Err(OrchestratorError::AllReadyNodesClaimed { nodes: ready }),
        }
    }

    /// Carry one node from dispatch to commit. The session guard owns the
    /// worktree for the whole attempt loop, so every early return cleans up.
    #[instrument(skip(self, id, history), fields(node = %id))]
    async fn execute_node(
        &self,
        id: &NodeId,
        history: &mut Vec<RunState>,
    ) -> Result<NodeRun, OrchestratorError> {
        let dispatch_err = |e: anyhow::Error| OrchestratorError::in_phase(RunPhase::Dispatch, Some(id), e);
        let spec = self
            .nodes
            .get(id)
            .ok_or_else(|| dispatch_err(anyhow::anyhow!("node {} is not in the plan", id)))?;

        let Some(mut guard) = self.acquire_session(spec).map_err(dispatch_err)? else {
            return Ok(NodeRun::Lost);
        };
        let record = self
            .status
            .load()
            .map_err(|e| dispatch_err(e.into()))?
            .remove(id)
            .unwrap_or_default();
        let mut attempts = record.attempts;
        // Every failure since the node was last reset, oldest first
        let mut failures = record.last_errors;
        let policy = self.config.retry;
        let mut all_errors = Vec::new();

        loop {
            history.push(RunState::Dispatch);
            let attempt = attempts + 1;
            let mut context = ExecutionContext::for_node(spec)
                .with_role(&self.config.role, &self.config.role_instructions)
                .with_session(guard.session())
                .with_attempt(attempt, policy.max_attempts)
                .with_prior_failures(&failures);
            if let Some(path) = &self.config.context_file {
                context = context.with_project_context_file(path);
            }

            let signal = self
                .agent
                .execute(AgentRequest {
                    workdir: guard.worktree_path().to_path_buf(),
                    context: context.render(),
                    node: id.to_string(),
                    attempt,
                })
                .await
                .map_err(dispatch_err)?;
            match &signal {
                AgentSignal::Completed => info!(attempt, "Agent finished"),
                AgentSignal::Failed { reason } => warn!(attempt, reason = %reason, "Agent reported failure"),
                AgentSignal::TimedOut => warn!(attempt, "Agent timed out"),
            }

            history.push(RunState::Verify);
            let report = self
                .verifier
                .verify(VerifyRequest {
                    project_dir: guard.worktree_path().to_path_buf(),
                    gate_set: self.config.gates.clone(),
                })
                .await
                .map_err(|e| OrchestratorError::in_phase(RunPhase::Verify, Some(id), e))?;

            match AttemptOutcome::from(&report) {
                AttemptOutcome::Passed => {
                    info!(attempt, "Verification passed");
                    attempts = attempt;
                    break;
                }
                AttemptOutcome::Failed { errors } => {
                    failures.extend(errors.iter().map(|e| format!("attempt {}: {}", attempt, e)));
                    attempts = self
                        .status
                        .record_failure(id, &failures)
                        .map_err(|e| OrchestratorError::in_phase(RunPhase::Verify, Some(id), e))?;
                    warn!(attempt = attempts, problems = errors.len(), "Verification failed");
                    all_errors.extend(errors.iter().cloned());

                    match policy.decide(attempts) {
                        RetryDecision::Retry => history.push(RunState::Retry),
                        RetryDecision::GiveUp => {
                            history.push(RunState::MaxAttemptsExceeded);
                            return Err(OrchestratorError::MaxAttemptsExceeded {
                                node: id.clone(),
                                attempts,
                                last_errors: errors,
                            });
                        }
                    }
                }
            }
        }

        history.push(RunState::Commit);
        let commit_err = |e: anyhow::Error| OrchestratorError::in_phase(RunPhase::Commit, Some(id), e);
        let message = format!("wavefront: complete node {} ({})", id, spec.name);
        let commit_ref = self
            .worktrees
            .commit_all(guard.worktree_path(), &message)
            .map_err(|e| commit_err(e.into()))?;
        let branch = guard.session().branch.clone();
        self.worktrees
            .merge_worktree(&branch, &self.config.feature_branch, &self.config.repo_root)
            .map_err(|e| commit_err(e.into()))?;
        if let Some(remote) = &self.config.remote {
            self.worktrees
                .publish(&self.config.repo_root, &self.config.feature_branch, remote)
                .map_err(|e| commit_err(e.into()))?;
        }
        self.status
            .mark_complete(id)
            .map_err(|e| commit_err(e.into()))?;
        guard
            .set_status(SessionStatus::Done)
            .map_err(|e| commit_err(e.into()))?;
        guard.release().map_err(commit_err)?;

        info!(commit = ?commit_ref, attempts, "Node complete");
        Ok(NodeRun::Finished(ExecutionResult {
            node: id.clone(),
            success: true,
            commit_ref,
            errors: all_errors,
            attempts,
        }))
    }

    /// Claim `spec` for this process, then create its worktree.
    ///
    /// The registry entry is written first, under the registry lock, so a
    /// second process racing for the same node is turned away before either
    /// touches status or git. `None` means the node was lost to another
    /// process and the caller should select again.
    fn acquire_session(&self, spec: &NodeSpec) -> anyhow::Result<Option<SessionGuard>> {
        let slug = slugify(&format!("{}-{}", spec.id, spec.name), 48);
        let worktree = self.worktrees.plan_worktree(
            &self.config.repo_root,
            &slug,
            &self.config.owner,
            CreateOptions {
                base_branch: Some(self.config.feature_branch.clone()),
                branch: None,
            },
        )?;

        let info = SessionInfo {
            id: worktree.session_id.clone(),
            owner: self.config.owner.clone(),
            role: self.config.role.clone(),
            node_ref: Some(spec.id.clone()),
            branch: worktree.branch.clone(),
            worktree_path: worktree.path.clone(),
        };
        let session = match self.registry.register(info) {
            Ok(session) => session,
            Err(RegistryError::NodeClaimed { node, session }) => {
                info!(node = %node, holder = %session, "Node claimed by another session, reselecting");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.status.mark_in_progress(&spec.id) {
            self.abandon_claim(&session.id);
            return match e {
                StatusError::AlreadyComplete(node) => {
                    info!(node = %node, "Node completed by another session, reselecting");
                    Ok(None)
                }
                other => Err(other.into()),
            };
        }

        if let Err(e) = self.worktrees.add_worktree(&self.config.repo_root, &worktree) {
            self.abandon_claim(&session.id);
            return Err(e.into());
        }

        Ok(Some(SessionGuard::new(
            &self.config.repo_root,
            session,
            self.worktrees.clone(),
        )))
    }

    fn abandon_claim(&self, session_id: &str) {
        if let Err(e) = self.registry.deregister(session_id) {
            warn!(session_id, error = %e, "Failed to release node claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitOutput;
    use crate::git::testing::FakeGit;
    use crate::node::NodeRecord;
    use crate::status::JsonStatusStore;
    use crate::verify::{GateFailure, VerifyReport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingAgent {
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl RecordingAgent {
        fn requests(&self) -> Vec<AgentRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Agent for RecordingAgent {
        async fn execute(&self, request: AgentRequest) -> anyhow::Result<AgentSignal> {
            self.requests.lock().unwrap().push(request);
            Ok(AgentSignal::Completed)
        }
    }

    /// Returns scripted reports in order, then passes.
    #[derive(Default)]
    struct ScriptedVerifier {
        reports: Mutex<VecDeque<VerifyReport>>,
        always_fail: bool,
    }

    impl ScriptedVerifier {
        fn failing_once() -> Self {
            let verifier = Self::default();
            verifier
                .reports
                .lock()
                .unwrap()
                .push_back(VerifyReport::fail(vec![GateFailure::message("tests failed: 2 of 10")]));
            verifier
        }

        fn failing_with(messages: &[&str]) -> Self {
            let verifier = Self::default();
            verifier.reports.lock().unwrap().extend(
                messages
                    .iter()
                    .map(|m| VerifyReport::fail(vec![GateFailure::message(*m)])),
            );
            verifier
        }

        fn always_failing() -> Self {
            Self {
                always_fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(&self, _request: VerifyRequest) -> anyhow::Result<VerifyReport> {
            if self.always_fail {
                return Ok(VerifyReport::fail(vec![GateFailure::message("lint failed")]));
            }
            Ok(self
                .reports
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(VerifyReport::pass))
        }
    }

    /// Hands out one stale snapshot while another process completes `node`
    /// behind it.
    struct RacingStatus {
        inner: Arc<JsonStatusStore>,
        node: NodeId,
        raced: Mutex<bool>,
    }

    impl StatusStore for RacingStatus {
        fn load(&self) -> Result<StatusMap, crate::errors::StatusError> {
            let records = self.inner.load()?;
            let mut raced = self.raced.lock().unwrap();
            if !*raced {
                *raced = true;
                self.inner.mark_complete(&self.node)?;
            }
            Ok(records)
        }

        fn update(
            &self,
            mutate: &mut dyn FnMut(&mut StatusMap),
        ) -> Result<StatusMap, crate::errors::StatusError> {
            self.inner.update(mutate)
        }
    }

    struct Harness {
        _dir: TempDir,
        repo: PathBuf,
        git: Arc<FakeGit>,
        agent: Arc<RecordingAgent>,
        status: Arc<JsonStatusStore>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let repo = dir.path().join("repo");
            std::fs::create_dir_all(&repo).unwrap();
            Self {
                status: Arc::new(JsonStatusStore::for_repo(&repo)),
                _dir: dir,
                repo,
                git: Arc::new(FakeGit::new()),
                agent: Arc::new(RecordingAgent::default()),
            }
        }

        fn config(&self, max_attempts: u32) -> OrchestratorConfig {
            OrchestratorConfig {
                repo_root: self.repo.clone(),
                feature_branch: "main".to_string(),
                owner: "alice".to_string(),
                role: "implementer".to_string(),
                role_instructions: "Implement the task.".to_string(),
                context_file: None,
                gates: vec![Gate {
                    name: "test".to_string(),
                    command: "true".to_string(),
                }],
                retry: RetryPolicy::new(max_attempts),
                max_nodes: None,
                remote: None,
            }
        }

        fn orchestrator(
            &self,
            config: OrchestratorConfig,
            nodes: Vec<NodeSpec>,
            verifier: ScriptedVerifier,
        ) -> Orchestrator {
            self.orchestrator_with_status(config, nodes, verifier, self.status.clone())
        }

        fn orchestrator_with_status(
            &self,
            config: OrchestratorConfig,
            nodes: Vec<NodeSpec>,
            verifier: ScriptedVerifier,
            status: Arc<dyn StatusStore>,
        ) -> Orchestrator {
            Orchestrator::new(
                config,
                nodes,
                Collaborators {
                    agent: self.agent.clone(),
                    verifier: Arc::new(verifier),
                    status,
                    worktrees: WorktreeManager::new(self.git.clone(), "wavefront"),
                },
            )
            .unwrap()
        }

        fn status_of(&self, id: &str) -> NodeRecord {
            self.status
                .load()
                .unwrap()
                .get(&NodeId::from(id))
                .cloned()
                .unwrap_or_default()
        }

        fn active_sessions(&self) -> usize {
            SessionRegistry::for_repo(&self.repo)
                .active_sessions()
                .unwrap()
                .len()
        }
    }

    fn node(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec::new(id, &format!("Task {}", id), deps.iter().map(|d| NodeId::from(*d)).collect())
            .with_description(&format!("Description of {}", id))
    }

    fn chain() -> Vec<NodeSpec> {
        vec![node("1", &[]), node("2", &["1"]), node("3", &["2"])]
    }

    fn merges(git: &FakeGit) -> Vec<String> {
        git.calls()
            .into_iter()
            .filter(|args| args.first().map(String::as_str) == Some("merge") && args.len() == 4)
            .map(|args| args[3].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_runs_chain_to_completion_in_order() {
        let h = Harness::new();
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let summary = orch.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::AllComplete);
        let order: Vec<&str> = summary.executed.iter().map(|r| r.node.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        for id in ["1", "2", "3"] {
            let record = h.status_of(id);
            assert_eq!(record.status, NodeStatus::Complete);
            assert!(record.completed_at.is_some());
        }
        assert_eq!(
            merges(&h.git),
            vec![
                "wavefront/alice/1-task-1",
                "wavefront/alice/2-task-2",
                "wavefront/alice/3-task-3"
            ]
        );
        assert_eq!(h.active_sessions(), 0);
        assert_eq!(summary.history.last(), Some(&RunState::Done));
    }

    #[tokio::test]
    async fn test_context_is_scoped_to_one_node() {
        let h = Harness::new();
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());
        orch.run().await.unwrap();

        let requests = h.agent.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].context.contains("Description of 2"));
        assert!(!requests[1].context.contains("Description of 1"));
        assert!(!requests[1].context.contains("Description of 3"));
    }

    #[tokio::test]
    async fn test_failed_verification_retries_with_failure_detail() {
        let h = Harness::new();
        let orch = h.orchestrator(h.config(3), vec![node("1", &[])], ScriptedVerifier::failing_once());

        let summary = orch.run().await.unwrap();

        assert_eq!(
            summary.history,
            vec![
                RunState::Select,
                RunState::Dispatch,
                RunState::Verify,
                RunState::Retry,
                RunState::Dispatch,
                RunState::Verify,
                RunState::Commit,
                RunState::Advance,
                RunState::Select,
                RunState::Done,
            ]
        );
        let requests = h.agent.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].context.contains("tests failed"));
        assert!(requests[1].context.contains("tests failed: 2 of 10"));
        // Retry reuses the same worktree
        assert_eq!(requests[0].workdir, requests[1].workdir);
        assert_eq!(summary.executed[0].attempts, 2);
        assert_eq!(h.status_of("1").attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_context_carries_every_prior_failure() {
        let h = Harness::new();
        let verifier = ScriptedVerifier::failing_with(&["first failure: type error", "second failure: lint"]);
        let orch = h.orchestrator(h.config(3), vec![node("1", &[])], verifier);

        let summary = orch.run().await.unwrap();

        let requests = h.agent.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].context.contains("attempt 1: first failure: type error"));
        assert!(!requests[1].context.contains("second failure"));
        assert!(requests[2].context.contains("attempt 1: first failure: type error"));
        assert!(requests[2].context.contains("attempt 2: second failure: lint"));
        assert_eq!(summary.executed[0].attempts, 3);
        assert_eq!(
            summary.executed[0].errors,
            vec!["first failure: type error", "second failure: lint"]
        );
    }

    #[tokio::test]
    async fn test_accumulated_failures_are_persisted() {
        let h = Harness::new();
        let verifier = ScriptedVerifier::failing_with(&["first failure: type error", "second failure: lint"]);
        let orch = h.orchestrator(h.config(2), vec![node("1", &[])], verifier);

        assert!(orch.run().await.is_err());

        let record = h.status_of("1");
        assert_eq!(record.attempts, 2);
        assert_eq!(
            record.last_errors,
            vec![
                "attempt 1: first failure: type error",
                "attempt 2: second failure: lint"
            ]
        );
    }

    #[tokio::test]
    async fn test_max_attempts_aborts_and_leaves_node_in_progress() {
        let h = Harness::new();
        let orch = h.orchestrator(h.config(2), chain(), ScriptedVerifier::always_failing());

        let err = orch.run().await.unwrap_err();

        match &err {
            OrchestratorError::MaxAttemptsExceeded { node, attempts, last_errors } => {
                assert_eq!(node.as_str(), "1");
                assert_eq!(*attempts, 2);
                assert_eq!(last_errors, &vec!["lint failed".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let record = h.status_of("1");
        assert_eq!(record.status, NodeStatus::InProgress);
        assert_eq!(
            record.last_errors,
            vec!["attempt 1: lint failed", "attempt 2: lint failed"]
        );
        assert_eq!(h.agent.requests().len(), 2);
        // Session and worktree are cleaned up on the error path
        assert_eq!(h.active_sessions(), 0);
        assert!(h.git.called_with(&["worktree", "remove", "--force"]));
        assert!(merges(&h.git).is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_node_is_not_reselected() {
        let h = Harness::new();
        let orch = h.orchestrator(h.config(1), chain(), ScriptedVerifier::always_failing());
        assert!(orch.run().await.is_err());

        // Rerun: node 1 is exhausted and everything depends on it
        let orch = h.orchestrator(h.config(1), chain(), ScriptedVerifier::default());
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Deadlock { ref remaining } if remaining.len() == 3));
        assert_eq!(h.agent.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_resumes_persisted_attempt_budget() {
        let h = Harness::new();
        h.status
            .update(&mut |records| {
                records.insert(
                    NodeId::from("1"),
                    NodeRecord {
                        status: NodeStatus::InProgress,
                        attempts: 1,
                        last_errors: vec!["previous crash detail".to_string()],
                        ..Default::default()
                    },
                );
            })
            .unwrap();
        let orch = h.orchestrator(h.config(3), vec![node("1", &[])], ScriptedVerifier::default());

        orch.run().await.unwrap();

        let requests = h.agent.requests();
        assert_eq!(requests[0].attempt, 2);
        assert!(requests[0].context.contains("Attempt 2 of 3"));
        assert!(requests[0].context.contains("previous crash detail"));
    }

    #[tokio::test]
    async fn test_failed_status_deadlocks() {
        let h = Harness::new();
        h.status
            .update(&mut |records| {
                records.insert(NodeId::from("1"), NodeRecord {
                    status: NodeStatus::Failed,
                    ..Default::default()
                });
            })
            .unwrap();
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let err = orch.run().await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Deadlock { .. }));
        assert_eq!(err.report().kind, "deadlock");
        assert!(h.agent.requests().is_empty());
    }

    #[tokio::test]
    async fn test_skips_nodes_claimed_by_other_sessions() {
        let h = Harness::new();
        let other = h.repo.join("elsewhere");
        SessionRegistry::for_repo(&h.repo)
            .register(SessionInfo {
                id: "other-process".to_string(),
                owner: "bob".to_string(),
                role: "implementer".to_string(),
                node_ref: Some(NodeId::from("1")),
                branch: "wavefront/bob/1".to_string(),
                worktree_path: other,
            })
            .unwrap();
        let mut config = h.config(3);
        config.max_nodes = Some(1);
        let orch = h.orchestrator(config, vec![node("1", &[]), node("2", &[])], ScriptedVerifier::default());

        let summary = orch.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::NodeLimitReached);
        assert_eq!(summary.executed[0].node.as_str(), "2");
        assert_eq!(h.status_of("1").status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_node_completed_elsewhere_after_selection_is_not_redispatched() {
        let h = Harness::new();
        let status = Arc::new(RacingStatus {
            inner: h.status.clone(),
            node: NodeId::from("1"),
            raced: Mutex::new(false),
        });
        let orch = h.orchestrator_with_status(
            h.config(3),
            vec![node("1", &[]), node("2", &[])],
            ScriptedVerifier::default(),
            status,
        );

        let summary = orch.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::AllComplete);
        let executed: Vec<&str> = summary.executed.iter().map(|r| r.node.as_str()).collect();
        assert_eq!(executed, vec!["2"]);
        let dispatched: Vec<String> = h.agent.requests().into_iter().map(|r| r.node).collect();
        assert_eq!(dispatched, vec!["2".to_string()]);
        // The other process's completion is left as it wrote it
        let record = h.status_of("1");
        assert_eq!(record.status, NodeStatus::Complete);
        assert!(record.completed_at.is_some());
        assert!(!h.git.called_with(&["worktree", "add", "-b", "wavefront/alice/1-task-1"]));
        assert_eq!(h.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_all_ready_nodes_claimed_stops_run() {
        let h = Harness::new();
        SessionRegistry::for_repo(&h.repo)
            .register(SessionInfo {
                id: "other-process".to_string(),
                owner: "bob".to_string(),
                role: "implementer".to_string(),
                node_ref: Some(NodeId::from("1")),
                branch: "wavefront/bob/1".to_string(),
                worktree_path: h.repo.join("elsewhere"),
            })
            .unwrap();
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let err = orch.run().await.unwrap_err();

        assert!(matches!(err, OrchestratorError::AllReadyNodesClaimed { ref nodes } if nodes == &vec![NodeId::from("1")]));
        assert!(h.agent.requests().is_empty());
    }

    #[tokio::test]
    async fn test_merge_failure_is_tagged_commit_and_cleans_up() {
        let h = Harness::new();
        h.git.respond(|_, args| {
            (args.first() == Some(&"merge") && args.get(1) == Some(&"--no-ff"))
                .then(|| GitOutput::failed("CONFLICT (content)"))
        });
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let err = orch.run().await.unwrap_err();

        let report = err.report();
        assert_eq!(report.kind, "infrastructure");
        assert_eq!(report.phase, Some(RunPhase::Commit));
        assert_eq!(report.node, Some(NodeId::from("1")));
        assert_eq!(h.status_of("1").status, NodeStatus::InProgress);
        assert_eq!(h.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_worktree_creation_failure_is_tagged_dispatch() {
        let h = Harness::new();
        h.git.respond(|_, args| {
            (args.first() == Some(&"worktree") && args.get(1) == Some(&"add"))
                .then(|| GitOutput::failed("fatal: disk full"))
        });
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let err = orch.run().await.unwrap_err();

        assert_eq!(err.report().phase, Some(RunPhase::Dispatch));
        assert!(err.to_string().contains("DISPATCH failed for node 1"));
        assert!(h.agent.requests().is_empty());
    }

    #[tokio::test]
    async fn test_already_complete_plan_is_done_immediately() {
        let h = Harness::new();
        for id in ["1", "2", "3"] {
            h.status.mark_complete(&NodeId::from(id)).unwrap();
        }
        let orch = h.orchestrator(h.config(3), chain(), ScriptedVerifier::default());

        let summary = orch.run().await.unwrap();

        assert_eq!(summary.history, vec![RunState::Select, RunState::Done]);
        assert!(h.agent.requests().is_empty());
        assert!(h.git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_structural_error_rejected_at_construction() {
        let h = Harness::new();
        let result = Orchestrator::new(
            h.config(3),
            vec![node("1", &["2"]), node("2", &["1"])],
            Collaborators {
                agent: h.agent.clone(),
                verifier: Arc::new(ScriptedVerifier::default()),
                status: h.status.clone(),
                worktrees: WorktreeManager::new(h.git.clone(), "wavefront"),
            },
        );
        let err = result.err().unwrap();
        assert_eq!(err.report().kind, "structural");
        assert!(!h.status.path().exists());
    }

    #[tokio::test]
    async fn test_publishes_when_remote_configured() {
        let h = Harness::new();
        let mut config = h.config(3);
        config.remote = Some("origin".to_string());
        let orch = h.orchestrator(config, vec![node("1", &[])], ScriptedVerifier::default());

        orch.run().await.unwrap();

        assert!(h.git.called_with(&["push", "origin", "main"]));
    }
}
