use crate::conductor_config::FailurePolicy;
use crate::errors::ConfigError;
use crate::phase::{Phase, default_pipeline, substitute_feature};
use crate::runner::CommandSpec;
use crate::security::{FeatureName, Validator};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the external tool is invoked for phases without an explicit command.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub profile: Option<String>,
    pub profile_flag: String,
}

impl Default for ToolInvocation {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            profile: None,
            profile_flag: "--profile".to_string(),
        }
    }
}

impl ToolInvocation {
    /// Argv-style command for one tool invocation; the prompt goes on stdin.
    pub fn command_spec(
        &self,
        phase: &str,
        feature: &FeatureName,
    ) -> Result<CommandSpec, ConfigError> {
        let profile = self
            .profile
            .as_deref()
            .ok_or_else(|| ConfigError::MissingProfile {
                phase: phase.to_string(),
            })?;
        Ok(CommandSpec::new(&self.command)
            .args(self.args.iter().map(|a| substitute_feature(a, feature.as_str())))
            .arg(&self.profile_flag)
            .arg(profile))
    }
}

/// Resolved quality gate settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QualitySettings {
    /// Artifact path template relative to the project directory.
    pub artifact: String,
    pub threshold: f64,
    pub max_attempts: u32,
    pub score_pattern: Option<String>,
    pub regenerate_phase: String,
}

impl QualitySettings {
    pub fn artifact_path(&self, project_dir: &Path, feature: &FeatureName) -> PathBuf {
        project_dir.join(substitute_feature(&self.artifact, feature.as_str()))
    }
}

/// Runtime configuration for the orchestrator.
///
/// Every recognized option is enumerated here and fixed before a run starts;
/// nothing is read from the environment afterwards.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub project_dir: PathBuf,
    pub manifest_dir: PathBuf,
    pub log_dir: PathBuf,
    pub tool: ToolInvocation,
    /// Default per-phase budget.
    pub phase_timeout: Duration,
    /// SIGTERM → SIGKILL grace period.
    pub grace: Duration,
    pub max_phase_retries: u32,
    pub timeout_backoff: f64,
    pub on_failure: FailurePolicy,
    pub validator: Validator,
    pub quality: Option<QualitySettings>,
    pub phases: Vec<Phase>,
}

impl OrchestratorConfig {
    /// Defaults for a project directory, with the reference pipeline.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let conductor_dir = project_dir.join(crate::conductor_config::CONDUCTOR_DIR);
        Self {
            manifest_dir: conductor_dir.join("manifests"),
            log_dir: conductor_dir.join("logs"),
            project_dir,
            tool: ToolInvocation::default(),
            phase_timeout: Duration::from_secs(900),
            grace: crate::runner::DEFAULT_GRACE_PERIOD,
            max_phase_retries: 1,
            timeout_backoff: 2.0,
            on_failure: FailurePolicy::Halt,
            validator: Validator::default(),
            quality: None,
            phases: default_pipeline(),
        }
    }

    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.tool.profile = Some(profile.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_max_phase_retries(mut self, retries: u32) -> Self {
        self.max_phase_retries = retries;
        self
    }

    pub fn with_quality(mut self, quality: QualitySettings) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Budget for `phase` on its first attempt.
    pub fn timeout_for(&self, phase: &Phase) -> Duration {
        phase
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.phase_timeout)
    }

    /// Per-feature directory holding one log file per phase attempt.
    pub fn feature_log_dir(&self, feature: &FeatureName) -> PathBuf {
        self.log_dir.join(feature.as_str())
    }

    pub fn phase_log_path(&self, feature: &FeatureName, phase: &str, attempt: u32) -> PathBuf {
        self.feature_log_dir(feature)
            .join(format!("{phase}.attempt-{attempt}.log"))
    }

    /// Every tool-invoking phase among `phases` needs an explicit profile.
    pub fn check_profile<'a>(
        &self,
        phases: impl IntoIterator<Item = &'a Phase>,
    ) -> Result<(), ConfigError> {
        if self.tool.profile.is_some() {
            return Ok(());
        }
        match phases.into_iter().find(|p| p.uses_tool()) {
            Some(phase) => Err(ConfigError::MissingProfile {
                phase: phase.name.clone(),
            }),
            None => Ok(()),
        }
    }
}
