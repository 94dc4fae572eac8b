//! Configuration view and validation commands: `conductor config`.

use anyhow::Result;
use console::style;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<u8> {
    use conductor::conductor_config::ConductorConfig;
    use conductor::exit_codes;

    let config = ConductorConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using defaults. Run 'conductor init' to create one.");
            }
            println!();

            let defaults = &config.toml.defaults;
            println!("[defaults]");
            println!("  grace_secs = {}", defaults.grace_secs);
            println!("  max_phase_retries = {}", defaults.max_phase_retries);
            println!("  timeout_backoff = {}", defaults.timeout_backoff);
            println!();

            let security = &config.toml.security;
            println!("[security]");
            println!("  strip_prefix = \"{}\"", security.strip_prefix);
            if security.check_redundant_prefix {
                println!("  redundant_prefix = \"{}\"", security.redundant_prefix);
            } else {
                println!("  redundant_prefix check disabled");
            }
            println!();

            let quality = &config.toml.quality;
            println!("[quality]");
            println!("  enabled = {}", quality.enabled);
            if let Some(artifact) = &quality.artifact {
                println!("  artifact = \"{}\"", artifact);
            }
            println!("  threshold = {}", quality.threshold);
            if let Some(pattern) = &quality.score_pattern {
                println!("  score_pattern = \"{}\"", pattern);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  tool.command = \"{}\"", config.tool_command());
            match config.profile() {
                Some(profile) => println!("  tool.profile = \"{}\"", profile),
                None => println!("  tool.profile = {}", style("(not set)").yellow()),
            }
            match config.timeout_secs() {
                Ok(secs) => println!("  timeout_secs = {}", secs),
                Err(e) => println!("  timeout_secs = {}", style(e).red()),
            }
            match config.max_attempts() {
                Ok(attempts) => println!("  quality.max_attempts = {}", attempts),
                Err(e) => println!("  quality.max_attempts = {}", style(e).red()),
            }
            println!("  on_failure = \"{}\"", config.on_failure());
            println!("  phases = {}", config.toml.effective_phases().len());
            println!();
            Ok(exit_codes::SUCCESS)
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let (warnings, errors) = config.validate();
            if !warnings.is_empty() {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                println!();
            }
            if errors.is_empty() {
                println!("Configuration is valid.");
                println!();
                return Ok(exit_codes::SUCCESS);
            }
            println!("Configuration errors:");
            for error in &errors {
                println!("  - {}", style(error).red());
            }
            println!();
            Ok(exit_codes::FAILURE)
        }
    }
}
