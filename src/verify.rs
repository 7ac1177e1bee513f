//! The verifier collaborator.
//!
//! A verification run executes a set of gates against a working directory
//! and reports one boolean. There is no partial credit: any failing gate,
//! including one that runs out of time, fails the whole run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Most located diagnostics kept from one gate's output.
const MAX_DIAGNOSTICS_PER_GATE: usize = 20;

static DIAGNOSTIC_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:-->\s*)?(?P<file>[\w./\\-]+\.\w+):(?P<line>\d+)(?::\d+)?:?\s*(?P<msg>.*)$").ok()
});

/// A named shell command that must exit zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub project_dir: PathBuf,
    pub gate_set: Vec<Gate>,
}

/// One problem found by a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl GateFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            message: message.into(),
            remediation: None,
        }
    }

    /// One-line form used in retry context.
    pub fn render(&self) -> String {
        let mut out = match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{}: {}", file, line, self.message),
            (Some(file), None) => format!("{}: {}", file, self.message),
            _ => self.message.clone(),
        };
        if let Some(fix) = &self.remediation {
            out.push_str(&format!(" (fix: {})", fix));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub passed: bool,
    #[serde(default)]
    pub errors: Vec<GateFailure>,
}

impl VerifyReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<GateFailure>) -> Self {
        Self {
            passed: false,
            errors,
        }
    }

    pub fn rendered_errors(&self) -> Vec<String> {
        self.errors.iter().map(GateFailure::render).collect()
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Check the working directory. `Err` means verification could not be
    /// attempted; a failing gate is an `Ok` report with `passed == false`.
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyReport>;
}

/// Runs each gate through `sh -c` with a wall-clock limit.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    gate_timeout: Duration,
}

impl CommandVerifier {
    pub fn new(gate_timeout: Duration) -> Self {
        Self { gate_timeout }
    }

    async fn run_gate(&self, gate: &Gate, request: &VerifyRequest) -> Result<Vec<GateFailure>> {
        debug!(gate = %gate.name, command = %gate.command, "Running gate");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&gate.command)
            .current_dir(&request.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn gate {}", gate.name))?;

        let output = match timeout(self.gate_timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to wait for gate {}", gate.name))?,
            Err(_) => {
                warn!(gate = %gate.name, secs = self.gate_timeout.as_secs(), "Gate timed out");
                return Ok(vec![GateFailure::message(format!(
                    "gate {} timed out after {} seconds",
                    gate.name,
                    self.gate_timeout.as_secs()
                ))]);
            }
        };

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}\n{}", stdout, stderr);
        let mut failures = parse_diagnostics(&combined);
        if failures.is_empty() {
            let code = output.status.code().unwrap_or(-1);
            let detail: Vec<&str> = combined
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            let tail = detail[detail.len().saturating_sub(10)..].join("\n");
            failures.push(GateFailure::message(if tail.is_empty() {
                format!("gate {} failed with exit code {}", gate.name, code)
            } else {
                format!("gate {} failed with exit code {}:\n{}", gate.name, code, tail)
            }));
        }
        Ok(failures)
    }
}

/// Pull `file:line: message` diagnostics out of tool output.
pub fn parse_diagnostics(output: &str) -> Vec<GateFailure> {
    let Some(re) = DIAGNOSTIC_RE.as_ref() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let file = caps.name("file")?.as_str().to_string();
            let line_no = caps.name("line").and_then(|m| m.as_str().parse().ok());
            let message = caps.name("msg").map(|m| m.as_str().trim()).unwrap_or_default();
            Some(GateFailure {
                file: Some(file),
                line: line_no,
                message: if message.is_empty() {
                    line.trim().to_string()
                } else {
                    message.to_string()
                },
                remediation: None,
            })
        })
        .take(MAX_DIAGNOSTICS_PER_GATE)
        .collect()
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyReport> {
        let mut errors = Vec::new();
        for gate in &request.gate_set {
            let failures = self.run_gate(gate, &request).await?;
            if failures.is_empty() {
                info!(gate = %gate.name, "Gate passed");
            } else {
                warn!(gate = %gate.name, problems = failures.len(), "Gate failed");
                errors.extend(failures);
            }
        }
        Ok(if errors.is_empty() {
            VerifyReport::pass()
        } else {
            VerifyReport::fail(errors)
        })
    }
}
