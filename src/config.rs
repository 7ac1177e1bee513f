//! Configuration for wavefront.
//!
//! Settings are read from `.wavefront/wavefront.toml` and layered:
//! file -> environment -> CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! feature_branch = "main"
//! namespace = "wavefront"
//! owner = "alice"
//! remote = "origin"
//!
//! [agent]
//! command = "claude"
//! args = ["--print"]
//! role = "implementer"
//! instructions = "Implement exactly the task below."
//! timeout_secs = 0
//!
//! [verify]
//! timeout_secs = 600
//!
//! [[verify.gates]]
//! name = "test"
//! command = "cargo test"
//!
//! [retry]
//! max_attempts = 3
//! ```

use crate::orchestrator::RetryPolicy;
use crate::util::state_dir;
use crate::verify::Gate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the config inside the state directory.
pub const CONFIG_FILE: &str = "wavefront.toml";

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Branch every node is merged into. Defaults to the branch checked out
    /// in the main tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_branch: Option<String>,
    /// Prefix of per-session branches
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Owner segment of branch names (default: $USER)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Push the feature branch here after each merge when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

fn default_namespace() -> String {
    "wavefront".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            feature_branch: None,
            namespace: default_namespace(),
            owner: None,
            remote: None,
        }
    }
}

/// Coding agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent CLI command (default: "claude", env WAVEFRONT_AGENT_CMD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Short project summary prepended to every context
    #[serde(default = "default_context_file")]
    pub context_file: PathBuf,
    /// Wall-clock limit per dispatch; 0 waits forever
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_role() -> String {
    "implementer".to_string()
}

fn default_instructions() -> String {
    "You implement exactly one task in an isolated working directory. \
     Make the smallest complete change that satisfies the task description."
        .to_string()
}

fn default_context_file() -> PathBuf {
    PathBuf::from(".wavefront/context.md")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            args: default_agent_args(),
            role: default_role(),
            instructions: default_instructions(),
            context_file: default_context_file(),
            timeout_secs: 0,
        }
    }
}

/// Verification gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySection {
    /// Wall-clock limit per gate. Always enforced.
    #[serde(default = "default_gate_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub gates: Vec<Gate>,
}

fn default_gate_timeout() -> u64 {
    600
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            timeout_secs: default_gate_timeout(),
            gates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// The parsed `wavefront.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WavefrontToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub verify: VerifySection,
    #[serde(default)]
    pub retry: RetrySection,
}

impl WavefrontToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse wavefront.toml")
    }

    /// Load from `<state_dir>/wavefront.toml`, or defaults when absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize wavefront.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// A starter config with one example gate.
    pub fn template() -> Self {
        let mut toml = Self::default();
        toml.verify.gates.push(Gate {
            name: "test".to_string(),
            command: "cargo test".to_string(),
        });
        toml
    }

    /// Agent command, with fallback to environment variable.
    pub fn agent_command(&self) -> String {
        self.agent
            .command
            .clone()
            .or_else(|| std::env::var("WAVEFRONT_AGENT_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.verify.gates.is_empty() {
            warnings.push(
                "No verification gates configured: every attempt will pass verification"
                    .to_string(),
            );
        }
        for gate in &self.verify.gates {
            if gate.command.trim().is_empty() {
                warnings.push(format!("Gate '{}' has an empty command", gate.name));
            }
        }
        if self.verify.timeout_secs == 0 {
            warnings.push("verify.timeout_secs is 0: every gate will time out".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0: treated as 1".to_string());
        }
        if self.project.namespace.trim().is_empty() || self.project.namespace.contains(' ') {
            warnings.push(format!(
                "Invalid branch namespace '{}'",
                self.project.namespace
            ));
        }

        warnings
    }
}

/// Resolved settings for one invocation.
///
/// Merges settings from:
/// 1. wavefront.toml
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the main working tree
    pub repo_root: PathBuf,
    /// Path to the .wavefront directory
    pub state_dir: PathBuf,
    pub toml: WavefrontToml,
    /// CLI override for the branch owner
    pub cli_owner: Option<String>,
    /// CLI override for the merge target
    pub cli_feature_branch: Option<String>,
}

impl Settings {
    pub fn new(repo_root: PathBuf) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .context("Failed to resolve repository root")?;
        let state_dir = state_dir(&repo_root);
        let toml = WavefrontToml::load_or_default(&state_dir)?;

        Ok(Self {
            repo_root,
            state_dir,
            toml,
            cli_owner: None,
            cli_feature_branch: None,
        })
    }

    pub fn with_cli_args(
        repo_root: PathBuf,
        owner: Option<String>,
        feature_branch: Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::new(repo_root)?;
        settings.cli_owner = owner;
        settings.cli_feature_branch = feature_branch;
        Ok(settings)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn plan_file(&self) -> PathBuf {
        self.state_dir.join("plan.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn context_file(&self) -> PathBuf {
        let path = &self.toml.agent.context_file;
        if path.is_absolute() {
            path.clone()
        } else {
            self.repo_root.join(path)
        }
    }

    /// Owner (CLI -> file -> $USER -> "wavefront").
    pub fn owner(&self) -> String {
        self.cli_owner
            .clone()
            .or_else(|| self.toml.project.owner.clone())
            .or_else(|| std::env::var("USER").ok())
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| "wavefront".to_string())
    }

    /// Merge target (CLI -> file -> current branch -> "main").
    pub fn feature_branch(&self) -> Result<String> {
        if let Some(branch) = self
            .cli_feature_branch
            .clone()
            .or_else(|| self.toml.project.feature_branch.clone())
        {
            return Ok(branch);
        }
        Ok(crate::git::current_branch(&self.repo_root)?.unwrap_or_else(|| "main".to_string()))
    }

    pub fn agent_command(&self) -> String {
        self.toml.agent_command()
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        match self.toml.agent.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.verify.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.toml.retry.max_attempts)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let toml = WavefrontToml::default();
        assert_eq!(toml.project.namespace, "wavefront");
        assert_eq!(toml.retry.max_attempts, 3);
        assert_eq!(toml.verify.timeout_secs, 600);
        assert_eq!(toml.agent.timeout_secs, 0);
        assert!(toml.verify.gates.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = WavefrontToml::parse(
            r#"
            [project]
            feature_branch = "develop"
            namespace = "wf"
            owner = "bob"
            remote = "origin"

            [agent]
            command = "my-agent"
            args = ["--fast"]
            timeout_secs = 900

            [verify]
            timeout_secs = 120

            [[verify.gates]]
            name = "test"
            command = "cargo test"

            [[verify.gates]]
            name = "lint"
            command = "cargo clippy -- -D warnings"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(toml.project.feature_branch.as_deref(), Some("develop"));
        assert_eq!(toml.project.namespace, "wf");
        assert_eq!(toml.agent_command(), "my-agent");
        assert_eq!(toml.agent.args, vec!["--fast".to_string()]);
        assert_eq!(toml.verify.gates.len(), 2);
        assert_eq!(toml.verify.gates[1].name, "lint");
        assert_eq!(toml.retry.max_attempts, 5);
        // Sections not given keep their defaults
        assert_eq!(toml.agent.role, "implementer");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = WavefrontToml::parse("[retry]\nmax_attempts = 1\n").unwrap();
        assert_eq!(toml.retry.max_attempts, 1);
        assert_eq!(toml.project.namespace, "wavefront");
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(WavefrontToml::parse("[retry]\nmax_attempts = \"many\"\n").is_err());
    }

    #[test]
    fn test_validate_warns() {
        let mut toml = WavefrontToml::default();
        toml.retry.max_attempts = 0;
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("No verification gates")));
        assert!(warnings.iter().any(|w| w.contains("max_attempts")));

        assert!(WavefrontToml::template().validate().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".wavefront").join(CONFIG_FILE);
        WavefrontToml::template().save(&path).unwrap();

        let loaded = WavefrontToml::load_or_default(&dir.path().join(".wavefront")).unwrap();
        assert_eq!(loaded.verify.gates.len(), 1);
    }

    #[test]
    fn test_settings_layering() {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let mut toml = WavefrontToml::default();
        toml.project.owner = Some("file-owner".to_string());
        toml.project.feature_branch = Some("develop".to_string());
        toml.agent.timeout_secs = 30;
        toml.save(&dir.path().join(".wavefront").join(CONFIG_FILE)).unwrap();

        let settings = Settings::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(settings.owner(), "file-owner");
        assert_eq!(settings.feature_branch().unwrap(), "develop");
        assert_eq!(settings.agent_timeout(), Some(Duration::from_secs(30)));
        assert!(settings.plan_file().ends_with(".wavefront/plan.json"));
        assert_eq!(settings.log_dir(), settings.state_dir.join("logs"));
        assert!(settings.log_dir().ends_with(".wavefront/logs"));

        let settings = Settings::with_cli_args(
            dir.path().to_path_buf(),
            Some("cli-owner".to_string()),
            Some("release".to_string()),
        )
        .unwrap();
        assert_eq!(settings.owner(), "cli-owner");
        assert_eq!(settings.feature_branch().unwrap(), "release");
    }

    #[test]
    fn test_zero_agent_timeout_means_none() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(settings.agent_timeout(), None);
        assert_eq!(settings.retry_policy().max_attempts, 3);
    }
}
