//! Phase definitions and the reference pipeline.
//!
//! Phases are declared in `.conductor/conductor.toml` as `[[phases]]` tables.
//! A phase either runs an explicit `command` (argv) or invokes the configured
//! external tool with its `prompt` file piped on stdin.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// A single named unit of work in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Unique phase name (e.g. "phase2a").
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Names of phases that must have succeeded first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Parallel group id; members of one group run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Whether a failure of this phase may be skipped. Nothing may depend on it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub non_blocking: bool,
    /// Path to the prompt file piped to the external tool. `{feature}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Explicit argv; when set the external tool is not used. `{feature}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Per-phase budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Phase {
    pub fn new(name: &str, description: &str, depends_on: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            depends_on,
            group: None,
            non_blocking: false,
            prompt: None,
            command: None,
            timeout_secs: None,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    pub fn with_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Whether this phase runs through the configured external tool.
    pub fn uses_tool(&self) -> bool {
        self.command.is_none()
    }

    /// A phase must have something to run.
    pub fn check_action(&self) -> Result<(), ConfigError> {
        match (&self.command, &self.prompt) {
            (Some(argv), _) if argv.is_empty() => Err(ConfigError::InvalidValue {
                key: format!("phases.{}.command", self.name),
                message: "command must not be empty".to_string(),
            }),
            (None, None) => Err(ConfigError::NoAction {
                phase: self.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// The reference pipeline: `phase1 → {phase2a, phase2b, phase2c} → phase3`.
pub fn default_pipeline() -> Vec<Phase> {
    let after = |name: &str| vec![name.to_string()];
    vec![
        Phase::new("phase1", "Initial analysis", vec![]).with_prompt("prompts/phase1.md"),
        Phase::new("phase2a", "Research: codebase", after("phase1"))
            .with_group("research")
            .with_prompt("prompts/phase2a.md"),
        Phase::new("phase2b", "Research: external docs", after("phase1"))
            .with_group("research")
            .with_prompt("prompts/phase2b.md"),
        Phase::new("phase2c", "Research: prior art", after("phase1"))
            .with_group("research")
            .with_prompt("prompts/phase2c.md"),
        Phase::new(
            "phase3",
            "Synthesis",
            vec!["phase2a".into(), "phase2b".into(), "phase2c".into()],
        )
        .with_prompt("prompts/phase3.md"),
    ]
}

/// Replace every `{feature}` placeholder with the validated feature name.
pub fn substitute_feature(template: &str, feature: &str) -> String {
    template.replace("{feature}", feature)
}
