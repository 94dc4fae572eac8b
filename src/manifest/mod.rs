//! Append-only audit trail of phase lifecycle events, one JSONL file per feature.
//!
//! ```text
//! .conductor/manifests/
//! ├── auth.jsonl                 main manifest, only ever appended to
//! └── auth.segments/             per-writer segments of a running parallel group
//!     ├── phase2a.jsonl
//!     └── phase2b.jsonl
//! ```
//!
//! Parallel units each write their terminal record to their own segment. The
//! orchestrator merges segments into the main file in submission order once
//! the group has been joined. Every append to the main file also takes an
//! exclusive advisory lock, so independent processes appending to the same
//! feature cannot interleave lines.

mod logger;
mod segment;

pub use logger::ManifestLogger;
pub use segment::SegmentWriter;

use crate::runner::{ExecutionResult, PhaseStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed UTC timestamp format of manifest records (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One line of the manifest. Unknown fields are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub phase: String,
    pub status: PhaseStatus,
    /// Present on terminal records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Present on terminal records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Orchestrator run that wrote the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl ManifestEntry {
    /// A bare `started` marker.
    pub fn started(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status: PhaseStatus::Started,
            exit_code: None,
            duration_sec: None,
            timestamp: format_timestamp(Utc::now()),
            attempt: None,
            run_id: None,
        }
    }

    /// A terminal record with an explicit status.
    pub fn finished(phase: &str, status: PhaseStatus, exit_code: i32, duration_sec: u64) -> Self {
        Self {
            status,
            exit_code: Some(exit_code),
            duration_sec: Some(duration_sec),
            ..Self::started(phase)
        }
    }

    /// The serialized form of a finalized execution result.
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            phase: result.phase.clone(),
            status: result.status,
            exit_code: result.exit_code,
            duration_sec: Some(result.duration_sec()),
            timestamp: format_timestamp(result.timestamp),
            attempt: Some(result.attempt),
            run_id: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_run_id(mut self, run_id: Option<Uuid>) -> Self {
        if run_id.is_some() {
            self.run_id = run_id;
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse one manifest line, checking the timestamp format as well as the shape.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let entry: Self = serde_json::from_str(line).map_err(|e| e.to_string())?;
        NaiveDateTime::parse_from_str(&entry.timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| format!("timestamp '{}' is not {TIMESTAMP_FORMAT}: {e}", entry.timestamp))?;
        if entry.phase.is_empty() {
            return Err("empty phase name".to_string());
        }
        Ok(entry)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_started_entry_has_no_terminal_fields() {
        let json = serde_json::to_string(&ManifestEntry::started("phase1")).unwrap();
        assert!(json.contains("\"status\":\"started\""));
        assert!(!json.contains("exit_code"));
        assert!(!json.contains("duration_sec"));
    }

    #[test]
    fn test_finished_entry_fields() {
        let entry = ManifestEntry::finished("phase2a", PhaseStatus::Failed, 2, 17);
        let value: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["phase"], "phase2a");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["exit_code"], 2);
        assert_eq!(value["duration_sec"], 17);
    }

    #[test]
    fn test_timestamp_format_is_second_precision_utc() {
        let entry = ManifestEntry::started("p");
        assert_eq!(entry.timestamp.len(), "2024-01-01T00:00:00Z".len());
        assert!(entry.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_from_result_keeps_timeout_status() {
        let result = ExecutionResult::new(
            "phase3",
            PhaseStatus::Timeout,
            Some(124),
            Duration::from_secs(61),
            2,
        );
        let entry = ManifestEntry::from_result(&result);
        assert_eq!(entry.status, PhaseStatus::Timeout);
        assert_eq!(entry.duration_sec, Some(61));
        assert_eq!(entry.attempt, Some(2));
    }

    #[test]
    fn test_parse_line_ignores_unknown_fields() {
        let line = r#"{"phase":"p","status":"success","exit_code":0,"duration_sec":1,"timestamp":"2025-03-01T10:00:00Z","host":"ci-7"}"#;
        let entry = ManifestEntry::parse_line(line).unwrap();
        assert!(entry.is_success());
    }

    #[test]
    fn test_parse_line_rejects_bad_timestamp() {
        let line = r#"{"phase":"p","status":"success","timestamp":"yesterday"}"#;
        assert!(ManifestEntry::parse_line(line).is_err());
    }

    #[test]
    fn test_parse_line_rejects_unknown_status() {
        let line = r#"{"phase":"p","status":"maybe","timestamp":"2025-03-01T10:00:00Z"}"#;
        assert!(ManifestEntry::parse_line(line).is_err());
    }
}
