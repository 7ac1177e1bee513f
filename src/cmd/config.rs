//! Configuration view and validation commands: `wavefront config`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use wavefront::config::{Settings, WavefrontToml};

use super::super::ConfigCommands;

pub fn cmd_config(repo_root: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let settings = Settings::new(repo_root.to_path_buf())?;
    let config_path = settings.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Wavefront Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No wavefront.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let rendered = toml::to_string_pretty(&settings.toml)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  agent command = \"{}\"", settings.agent_command());
            println!("  owner = \"{}\"", settings.owner());
            match settings.feature_branch() {
                Ok(branch) => println!("  feature_branch = \"{}\"", branch),
                Err(e) => println!("  feature_branch = {}", style(e).red()),
            }
            println!("  max_attempts = {}", settings.retry_policy().max_attempts);
            println!();

            if !config_path.exists() {
                println!("Run 'wavefront config init' to create a wavefront.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("wavefront.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            WavefrontToml::template().save(&config_path)?;

            println!("Created wavefront.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] feature_branch, namespace, owner, remote");
            println!("  - [agent] command, args, role, instructions, timeout_secs");
            println!("  - [[verify.gates]] the checks every attempt must pass");
            println!();
        }
    }

    Ok(())
}
