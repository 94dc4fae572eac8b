//! Execution outcome types shared by the runner, executor and manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code recorded when a unit stopped within the grace period after SIGTERM.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code recorded when a unit had to be killed forcefully.
pub const KILLED_EXIT_CODE: i32 = 137;
/// Exit code recorded when the command could not be launched at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

/// Lifecycle status of a phase as recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Started,
    Success,
    Failed,
    /// Budget elapsed; the process stopped after the graceful signal.
    Timeout,
    /// Budget elapsed and the graceful signal was not honored in time.
    Killed,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Budget-related endings. Retrying these with the same budget is pointless.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout | Self::Killed)
    }

    /// Status derived from a plain exit code: `success` iff zero.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 { Self::Success } else { Self::Failed }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Killed => "killed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The finalized outcome of one unit of work. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub phase: String,
    pub status: PhaseStatus,
    /// Exit code; `None` only when the wait itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock time from launch to return.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// When the unit finished (UTC).
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Launch or supervision error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn new(
        phase: &str,
        status: PhaseStatus,
        exit_code: Option<i32>,
        duration: Duration,
        attempt: u32,
    ) -> Self {
        Self {
            phase: phase.to_string(),
            status,
            exit_code,
            duration,
            timestamp: Utc::now(),
            attempt,
            log_path: None,
            error: None,
        }
    }

    /// A unit that never ran (spawn failure, supervisor panic).
    pub fn launch_failure(phase: &str, attempt: u32, error: &str, duration: Duration) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(
                phase,
                PhaseStatus::Failed,
                Some(LAUNCH_FAILURE_EXIT_CODE),
                duration,
                attempt,
            )
        }
    }

    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whole seconds, as written to the manifest.
    pub fn duration_sec(&self) -> u64 {
        self.duration.as_secs()
    }

    /// One-line description naming the phase and reason.
    pub fn describe(&self) -> String {
        let mut text = format!("phase {} {}", self.phase, self.status);
        if let Some(code) = self.exit_code {
            text.push_str(&format!(" (exit {code})"));
        }
        text.push_str(&format!(" after {}s", self.duration_sec()));
        if let Some(ref err) = self.error {
            text.push_str(&format!(": {err}"));
        }
        text
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
