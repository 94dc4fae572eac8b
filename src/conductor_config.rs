//! Unified configuration system for conductor.
//!
//! Reads `.conductor/conductor.toml` and layers it: file → environment → CLI.
//! Environment variables are read once, when the configuration is loaded;
//! the result is frozen into an [`OrchestratorConfig`] before anything runs.
//!
//! # Configuration File Format
//!
//! ```toml
//! [tool]
//! command = "claude"
//! args = ["--print"]
//! profile = "research"
//! profile_flag = "--profile"
//!
//! [defaults]
//! timeout_secs = 900
//! grace_secs = 5
//! max_phase_retries = 1
//! timeout_backoff = 2.0
//! on_failure = "halt"
//!
//! [security]
//! strip_prefix = "INITIAL_"
//! redundant_prefix = "prp_"
//! check_redundant_prefix = true
//!
//! [quality]
//! enabled = true
//! artifact = "docs/{feature}/plan.md"
//! threshold = 8.0
//! max_attempts = 3
//!
//! [[phases]]
//! name = "phase1"
//! prompt = "prompts/phase1.md"
//!
//! [[phases]]
//! name = "phase2a"
//! depends_on = ["phase1"]
//! group = "research"
//! ```

use crate::config::{OrchestratorConfig, QualitySettings, ToolInvocation};
use crate::dag::DagBuilder;
use crate::errors::ConfigError;
use crate::phase::{Phase, default_pipeline};
use crate::quality::QualityGate;
use crate::security::{DEFAULT_REDUNDANT_PREFIX, DEFAULT_STRIP_PREFIX, Validator};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project state directory.
pub const CONDUCTOR_DIR: &str = ".conductor";
/// Name of the configuration file inside [`CONDUCTOR_DIR`].
pub const CONFIG_FILE: &str = "conductor.toml";

/// What the orchestrator does when a phase does not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the failed branch; the run ends `Failed`.
    #[default]
    Halt,
    /// Stop everything; the run ends `Aborted`.
    Abort,
    /// Re-run the phase, bounded by `max_phase_retries`.
    Retry,
    /// Continue without the phase (non-blocking phases only).
    Skip,
    /// Ask the operator.
    Prompt,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Halt => write!(f, "halt"),
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Retry => write!(f, "retry"),
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Prompt => write!(f, "prompt"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "halt" => Ok(FailurePolicy::Halt),
            "abort" => Ok(FailurePolicy::Abort),
            "retry" => Ok(FailurePolicy::Retry),
            "skip" => Ok(FailurePolicy::Skip),
            "prompt" => Ok(FailurePolicy::Prompt),
            _ => anyhow::bail!(
                "Invalid failure policy '{}'. Valid values: halt, abort, retry, skip, prompt",
                s
            ),
        }
    }
}

/// External tool invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSection {
    /// Tool command (default: "claude")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra arguments passed before the profile flag
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit profile id; there is no default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default = "default_profile_flag")]
    pub profile_flag: String,
}

fn default_profile_flag() -> String {
    "--profile".to_string()
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            profile: None,
            profile_flag: default_profile_flag(),
        }
    }
}

/// Default execution settings for all phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between SIGTERM and SIGKILL
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_max_phase_retries")]
    pub max_phase_retries: u32,
    /// Budget multiplier applied when retrying a timed-out phase
    #[serde(default = "default_timeout_backoff")]
    pub timeout_backoff: f64,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_grace_secs() -> u64 {
    5
}

fn default_max_phase_retries() -> u32 {
    1
}

fn default_timeout_backoff() -> f64 {
    2.0
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            grace_secs: default_grace_secs(),
            max_phase_retries: default_max_phase_retries(),
            timeout_backoff: default_timeout_backoff(),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// Feature-name validation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySection {
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: String,
    #[serde(default = "default_redundant_prefix")]
    pub redundant_prefix: String,
    #[serde(default = "default_true")]
    pub check_redundant_prefix: bool,
}

fn default_strip_prefix() -> String {
    DEFAULT_STRIP_PREFIX.to_string()
}

fn default_redundant_prefix() -> String {
    DEFAULT_REDUNDANT_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            strip_prefix: default_strip_prefix(),
            redundant_prefix: default_redundant_prefix(),
            check_redundant_prefix: true,
        }
    }
}

impl SecuritySection {
    pub fn validator(&self) -> Validator {
        let redundant = self
            .check_redundant_prefix
            .then(|| self.redundant_prefix.clone());
        Validator::new()
            .with_strip_prefix(&self.strip_prefix)
            .with_redundant_prefix(redundant)
    }
}

/// Quality gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default)]
    pub enabled: bool,
    /// Artifact path template; `{feature}` is substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Regex with one capture group for the score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_pattern: Option<String>,
    /// Phase re-run to regenerate the artifact (default: last phase)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerate_phase: Option<String>,
}

fn default_threshold() -> f64 {
    8.0
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            enabled: false,
            artifact: None,
            threshold: default_threshold(),
            max_attempts: default_max_attempts(),
            score_pattern: None,
            regenerate_phase: None,
        }
    }
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorToml {
    #[serde(default)]
    pub tool: ToolSection,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub quality: QualitySection,
    /// Pipeline definition; empty means the reference pipeline
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `.conductor/conductor.toml`, or defaults if it does not exist.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Configuration written by `conductor init`.
    pub fn reference() -> Self {
        Self {
            phases: default_pipeline(),
            ..Self::default()
        }
    }

    pub fn effective_phases(&self) -> Vec<Phase> {
        if self.phases.is_empty() {
            default_pipeline()
        } else {
            self.phases.clone()
        }
    }

    /// Non-fatal findings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=10.0).contains(&self.quality.threshold) {
            warnings.push(format!(
                "quality.threshold {} is outside the 0-10 score scale; the gate can never pass",
                self.quality.threshold
            ));
        }
        if self.quality.enabled && self.quality.artifact.is_none() {
            warnings.push("quality.enabled is set but quality.artifact is missing".to_string());
        }
        if self.defaults.on_failure == FailurePolicy::Retry && self.defaults.max_phase_retries == 0
        {
            warnings.push(
                "defaults.on_failure = \"retry\" with max_phase_retries = 0 behaves like halt"
                    .to_string(),
            );
        }
        if self.tool.profile.is_none() && self.effective_phases().iter().any(Phase::uses_tool) {
            warnings.push(
                "no tool profile configured; runs fail until [tool] profile, CONDUCTOR_PROFILE or --profile is set"
                    .to_string(),
            );
        }

        warnings
    }
}

/// Environment overrides, captured once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub tool_command: Option<String>,
    pub profile: Option<String>,
    pub timeout_secs: Option<String>,
    pub max_attempts: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            tool_command: non_empty("CONDUCTOR_TOOL_CMD"),
            profile: non_empty("CONDUCTOR_PROFILE"),
            timeout_secs: non_empty("CONDUCTOR_TIMEOUT_SECS"),
            max_attempts: non_empty("CONDUCTOR_MAX_ATTEMPTS"),
        }
    }
}

/// Command-line overrides (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub profile: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub on_failure: Option<FailurePolicy>,
}

/// Loaded configuration with every layer attached.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub toml: ConductorToml,
    pub env: EnvOverrides,
    pub cli: CliOverrides,
}

impl ConductorConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        Ok(Self {
            project_dir,
            conductor_dir,
            toml,
            env: EnvOverrides::from_env(),
            cli: CliOverrides::default(),
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, cli: CliOverrides) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli = cli;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(CONFIG_FILE)
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.conductor_dir.join("manifests")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.conductor_dir.join("logs")
    }

    pub fn validator(&self) -> Validator {
        self.toml.security.validator()
    }

    /// Tool command (env → file → "claude"; there is no CLI flag for it).
    pub fn tool_command(&self) -> String {
        self.env
            .tool_command
            .clone()
            .or_else(|| self.toml.tool.command.clone())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Profile id (CLI → env → file). `None` is not defaulted.
    pub fn profile(&self) -> Option<String> {
        self.cli
            .profile
            .clone()
            .or_else(|| self.env.profile.clone())
            .or_else(|| self.toml.tool.profile.clone())
    }

    pub fn timeout_secs(&self) -> Result<u64, ConfigError> {
        if let Some(secs) = self.cli.timeout_secs {
            return Ok(secs);
        }
        match self.env.timeout_secs {
            Some(ref raw) => parse_env("CONDUCTOR_TIMEOUT_SECS", raw),
            None => Ok(self.toml.defaults.timeout_secs),
        }
    }

    pub fn max_attempts(&self) -> Result<u32, ConfigError> {
        if let Some(attempts) = self.cli.max_attempts {
            return Ok(attempts);
        }
        match self.env.max_attempts {
            Some(ref raw) => parse_env("CONDUCTOR_MAX_ATTEMPTS", raw),
            None => Ok(self.toml.quality.max_attempts),
        }
    }

    pub fn on_failure(&self) -> FailurePolicy {
        self.cli.on_failure.unwrap_or(self.toml.defaults.on_failure)
    }

    /// Resolve every layer into the explicit configuration the orchestrator runs with.
    ///
    /// Structural problems (invalid graph, bad numbers, bad score pattern)
    /// are errors here; a missing profile is reported by the orchestrator
    /// for the phases it is actually about to run.
    pub fn freeze(&self) -> Result<OrchestratorConfig, ConfigError> {
        let defaults = &self.toml.defaults;
        let timeout_secs = self.timeout_secs()?;
        if timeout_secs == 0 {
            return Err(invalid("defaults.timeout_secs", "must be greater than 0"));
        }
        if !(defaults.timeout_backoff.is_finite() && defaults.timeout_backoff > 1.0) {
            return Err(invalid(
                "defaults.timeout_backoff",
                "must be a finite number greater than 1.0 so a timed-out phase never reruns with the same budget",
            ));
        }

        let phases = self.toml.effective_phases();
        for phase in &phases {
            phase.check_action()?;
        }
        let graph = DagBuilder::new(phases.clone()).build()?;

        let quality = if self.toml.quality.enabled {
            let section = &self.toml.quality;
            let artifact = section
                .artifact
                .clone()
                .ok_or_else(|| invalid("quality.artifact", "required when quality is enabled"))?;
            let max_attempts = self.max_attempts()?;
            if max_attempts == 0 {
                return Err(invalid("quality.max_attempts", "must be at least 1"));
            }
            // Compile once here so a bad pattern is a configuration error.
            QualityGate::from_pattern(section.score_pattern.as_deref()).map_err(|e| {
                invalid("quality.score_pattern", &e.to_string())
            })?;
            let regenerate_phase = match section.regenerate_phase {
                Some(ref name) if graph.contains(name) => name.clone(),
                Some(ref name) => {
                    return Err(ConfigError::UnknownPhase {
                        phase: name.clone(),
                        context: "quality.regenerate_phase".to_string(),
                    });
                }
                None => graph
                    .topological_order()
                    .last()
                    .map(|name| name.to_string())
                    .ok_or_else(|| invalid("quality.regenerate_phase", "pipeline has no phases"))?,
            };
            Some(QualitySettings {
                artifact,
                threshold: section.threshold,
                max_attempts,
                score_pattern: section.score_pattern.clone(),
                regenerate_phase,
            })
        } else {
            None
        };

        Ok(OrchestratorConfig {
            project_dir: self.project_dir.clone(),
            manifest_dir: self.manifest_dir(),
            log_dir: self.log_dir(),
            tool: ToolInvocation {
                command: self.tool_command(),
                args: self.toml.tool.args.clone(),
                profile: self.profile(),
                profile_flag: self.toml.tool.profile_flag.clone(),
            },
            phase_timeout: Duration::from_secs(timeout_secs),
            grace: Duration::from_secs(defaults.grace_secs),
            max_phase_retries: defaults.max_phase_retries,
            timeout_backoff: defaults.timeout_backoff,
            on_failure: self.on_failure(),
            validator: self.validator(),
            quality,
            phases,
        })
    }

    /// Validation used by `conductor config validate`: warnings plus the
    /// hard errors `freeze` and the profile check would raise.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let warnings = self.toml.validate();
        let mut errors = Vec::new();
        match self.freeze() {
            Ok(frozen) => {
                if let Err(e) = frozen.check_profile(frozen.phases.iter()) {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(e.to_string()),
        }
        (warnings, errors)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("'{raw}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn config_from(content: &str) -> ConductorConfig {
        ConductorConfig {
            project_dir: PathBuf::from("/project"),
            conductor_dir: PathBuf::from("/project/.conductor"),
            toml: ConductorToml::parse(content).unwrap(),
            env: EnvOverrides::default(),
            cli: CliOverrides::default(),
        }
    }

    // =========================================
    // FailurePolicy tests
    // =========================================

    #[test]
    fn test_failure_policy_round_trip_names() {
        for policy in [
            FailurePolicy::Halt,
            FailurePolicy::Abort,
            FailurePolicy::Retry,
            FailurePolicy::Skip,
            FailurePolicy::Prompt,
        ] {
            assert_eq!(policy.to_string().parse::<FailurePolicy>().unwrap(), policy);
        }
        assert_eq!("RETRY".parse::<FailurePolicy>().unwrap(), FailurePolicy::Retry);
    }

    #[test]
    fn test_failure_policy_invalid() {
        let err = "sometimes".parse::<FailurePolicy>().unwrap_err();
        assert!(err.to_string().contains("Invalid failure policy"));
    }

    // =========================================
    // Parsing tests
    // =========================================

    #[test]
    fn test_empty_file_uses_defaults() {
        let toml = ConductorToml::parse("").unwrap();
        assert_eq!(toml.defaults.timeout_secs, 900);
        assert_eq!(toml.defaults.grace_secs, 5);
        assert_eq!(toml.defaults.on_failure, FailurePolicy::Halt);
        assert_eq!(toml.tool.profile_flag, "--profile");
        assert!(toml.tool.profile.is_none());
        assert_eq!(toml.security.strip_prefix, "INITIAL_");
        assert!(!toml.quality.enabled);
        assert_eq!(toml.quality.threshold, 8.0);
        assert_eq!(toml.effective_phases().len(), 5);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = ConductorToml::parse(
            r#"
[tool]
command = "my-tool"
profile = "ci"

[defaults]
timeout_secs = 60
on_failure = "retry"

[[phases]]
name = "build"
command = ["make"]

[[phases]]
name = "test"
depends_on = ["build"]
command = ["make", "test"]
timeout_secs = 120
"#,
        )
        .unwrap();
        assert_eq!(toml.tool.command.as_deref(), Some("my-tool"));
        assert_eq!(toml.defaults.on_failure, FailurePolicy::Retry);
        assert_eq!(toml.phases.len(), 2);
        assert_eq!(toml.phases[1].timeout_secs, Some(120));
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        assert!(ConductorToml::parse("[defaults]\non_failure = \"sometimes\"").is_err());
    }

    #[test]
    fn test_reference_config_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        ConductorToml::reference().save(&path).unwrap();
        let loaded = ConductorToml::load(&path).unwrap();
        assert_eq!(loaded.phases, default_pipeline());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = ConductorToml::load_or_default(dir.path()).unwrap();
        assert!(toml.phases.is_empty());
    }

    // =========================================
    // Layering tests
    // =========================================

    #[test]
    fn test_env_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CONDUCTOR_PROFILE", "env-profile"),
            ("CONDUCTOR_TIMEOUT_SECS", "30"),
            ("CONDUCTOR_TOOL_CMD", "  "),
        ]
        .into();
        let env = EnvOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(env.profile.as_deref(), Some("env-profile"));
        assert_eq!(env.timeout_secs.as_deref(), Some("30"));
        assert!(env.tool_command.is_none());
    }

    #[test]
    fn test_profile_precedence() {
        let mut config = config_from("[tool]\nprofile = \"file\"");
        assert_eq!(config.profile().as_deref(), Some("file"));
        config.env.profile = Some("env".into());
        assert_eq!(config.profile().as_deref(), Some("env"));
        config.cli.profile = Some("cli".into());
        assert_eq!(config.profile().as_deref(), Some("cli"));
    }

    #[test]
    fn test_timeout_precedence_and_bad_env() {
        let mut config = config_from("[defaults]\ntimeout_secs = 10");
        assert_eq!(config.timeout_secs().unwrap(), 10);
        config.env.timeout_secs = Some("abc".into());
        assert!(matches!(
            config.timeout_secs(),
            Err(ConfigError::InvalidValue { .. })
        ));
        config.cli.timeout_secs = Some(5);
        assert_eq!(config.timeout_secs().unwrap(), 5);
    }

    #[test]
    fn test_tool_command_defaults_to_claude() {
        let config = config_from("");
        assert_eq!(config.tool_command(), "claude");
    }

    // =========================================
    // Freeze tests
    // =========================================

    #[test]
    fn test_freeze_defaults() {
        let frozen = config_from("").freeze().unwrap();
        assert_eq!(frozen.phase_timeout, Duration::from_secs(900));
        assert_eq!(frozen.grace, Duration::from_secs(5));
        assert!(frozen.tool.profile.is_none());
        assert!(frozen.quality.is_none());
        assert_eq!(frozen.manifest_dir, PathBuf::from("/project/.conductor/manifests"));
    }

    #[test]
    fn test_freeze_rejects_cycle() {
        let config = config_from(
            r#"
[[phases]]
name = "a"
depends_on = ["b"]
command = ["true"]

[[phases]]
name = "b"
depends_on = ["a"]
command = ["true"]
"#,
        );
        assert!(matches!(config.freeze(), Err(ConfigError::Graph(_))));
    }

    #[test]
    fn test_freeze_rejects_backoff_of_one() {
        let config = config_from("[defaults]\ntimeout_backoff = 1.0");
        assert!(matches!(
            config.freeze(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "defaults.timeout_backoff"
        ));
    }

    #[test]
    fn test_freeze_rejects_non_finite_backoff() {
        for raw in ["inf", "nan"] {
            let config = config_from(&format!("[defaults]\ntimeout_backoff = {raw}"));
            assert!(matches!(
                config.freeze(),
                Err(ConfigError::InvalidValue { ref key, .. }) if key == "defaults.timeout_backoff"
            ));
        }
    }

    #[test]
    fn test_freeze_quality_defaults_regenerate_to_last_phase() {
        let config = config_from("[quality]\nenabled = true\nartifact = \"out/{feature}.md\"");
        let quality = config.freeze().unwrap().quality.unwrap();
        assert_eq!(quality.regenerate_phase, "phase3");
        assert_eq!(quality.max_attempts, 3);
    }

    #[test]
    fn test_freeze_quality_requires_artifact() {
        let config = config_from("[quality]\nenabled = true");
        assert!(config.freeze().is_err());
    }

    #[test]
    fn test_freeze_quality_rejects_unknown_regenerate_phase() {
        let config = config_from(
            "[quality]\nenabled = true\nartifact = \"a.md\"\nregenerate_phase = \"nope\"",
        );
        assert!(matches!(
            config.freeze(),
            Err(ConfigError::UnknownPhase { .. })
        ));
    }

    #[test]
    fn test_freeze_quality_rejects_bad_pattern() {
        let config = config_from(
            "[quality]\nenabled = true\nartifact = \"a.md\"\nscore_pattern = \"(unclosed\"",
        );
        assert!(config.freeze().is_err());
    }

    #[test]
    fn test_validate_reports_missing_profile() {
        let config = config_from("");
        let (warnings, errors) = config.validate();
        assert!(warnings.iter().any(|w| w.contains("profile")));
        assert!(errors.iter().any(|e| e.contains("no profile")));
    }

    #[test]
    fn test_validate_clean_command_pipeline() {
        let config = config_from("[[phases]]\nname = \"only\"\ncommand = [\"true\"]");
        let (warnings, errors) = config.validate();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_security_section_validator() {
        let config = config_from("[security]\ncheck_redundant_prefix = false");
        assert!(config.validator().validate("prp_feature").is_ok());
        assert!(config_from("").validator().validate("prp_feature").is_err());
    }
}
