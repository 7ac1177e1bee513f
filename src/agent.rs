//! The coding-agent collaborator.
//!
//! The orchestrator hands the agent a working directory and a rendered
//! context, then waits. What the agent does in between is opaque; the only
//! thing observed is the completion signal, and even that does not decide
//! success (the verifier does).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One dispatch to the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    pub context: String,
    pub node: String,
    pub attempt: u32,
}

/// How the agent reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSignal {
    Completed,
    Failed { reason: String },
    TimedOut,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one attempt and wait for it to finish. `Err` means the agent
    /// could not be run at all.
    async fn execute(&self, request: AgentRequest) -> Result<AgentSignal>;
}

/// Runs an external CLI with the context on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAgent {
    pub fn new(command: &str, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.to_string(),
            args,
            timeout,
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[async_trait]
impl Agent for CommandAgent {
    async fn execute(&self, request: AgentRequest) -> Result<AgentSignal> {
        info!(
            node = %request.node,
            attempt = request.attempt,
            command = %self.command,
            "Dispatching agent"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&request.workdir)
            .env("WAVEFRONT_NODE", &request.node)
            .env("WAVEFRONT_ATTEMPT", request.attempt.to_string())
            .env("WAVEFRONT_WORKDIR", &request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn agent command: {}", self.command))?;

        // Feeding stdin counts against the limit: an agent that never reads
        // would otherwise block the write forever
        let context = request.context.as_bytes();
        let finished = async move {
            if let Some(mut stdin) = child.stdin.take()
                && let Err(e) = stdin.write_all(context).await
            {
                // An agent that exits without reading its input is judged by
                // its exit status below
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write context to agent stdin");
                }
            }
            child.wait_with_output().await.context("Failed to wait for agent")
        };

        let output = match self.timeout {
            Some(limit) => match timeout(limit, finished).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(node = %request.node, secs = limit.as_secs(), "Agent timed out");
                    return Ok(AgentSignal::TimedOut);
                }
            },
            None => finished.await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(node = %request.node, stdout = %tail(&stdout, 20), "Agent output");

        if output.status.success() {
            Ok(AgentSignal::Completed)
        } else {
            let code = output.status.code().unwrap_or(-1);
            let detail = tail(stderr.trim(), 5);
            Ok(AgentSignal::Failed {
                reason: if detail.is_empty() {
                    format!("exit code {}", code)
                } else {
                    format!("exit code {}: {}", code, detail)
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(dir: &std::path::Path, context: &str) -> AgentRequest {
        AgentRequest {
            workdir: dir.to_path_buf(),
            context: context.to_string(),
            node: "1".to_string(),
            attempt: 1,
        }
    }

    fn sh(script: &str, limit: Option<Duration>) -> CommandAgent {
        CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()], limit)
    }

    #[tokio::test]
    async fn test_context_arrives_on_stdin() {
        let dir = tempdir().unwrap();
        let agent = sh("cat > prompt.txt", None);

        let signal = agent.execute(request(dir.path(), "## Task 1")).await.unwrap();

        assert_eq!(signal, AgentSignal::Completed);
        let written = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert_eq!(written, "## Task 1");
    }

    #[tokio::test]
    async fn test_environment_names_node_and_attempt() {
        let dir = tempdir().unwrap();
        let agent = sh("echo \"$WAVEFRONT_NODE/$WAVEFRONT_ATTEMPT\" > env.txt", None);

        agent.execute(request(dir.path(), "")).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert_eq!(written.trim(), "1/1");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failed_signal() {
        let dir = tempdir().unwrap();
        let agent = sh("echo 'rate limited' >&2; exit 3", None);

        let signal = agent.execute(request(dir.path(), "")).await.unwrap();

        match signal {
            AgentSignal::Failed { reason } => {
                assert!(reason.contains("exit code 3"));
                assert!(reason.contains("rate limited"));
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempdir().unwrap();
        let agent = sh("sleep 10", Some(Duration::from_millis(200)));

        let signal = agent.execute(request(dir.path(), "")).await.unwrap();
        assert_eq!(signal, AgentSignal::TimedOut);
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_stdin() {
        let dir = tempdir().unwrap();
        let agent = sh("sleep 10", Some(Duration::from_millis(300)));
        // Far larger than a pipe buffer, so the write blocks
        let context = "x".repeat(1024 * 1024);

        let started = std::time::Instant::now();
        let signal = agent.execute(request(dir.path(), &context)).await.unwrap();

        assert_eq!(signal, AgentSignal::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let dir = tempdir().unwrap();
        let agent = CommandAgent::new("wavefront-no-such-agent", vec![], None);
        assert!(agent.execute(request(dir.path(), "")).await.is_err());
    }
}
