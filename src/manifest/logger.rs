use super::segment::{append_lines_locked, append_locked, serialize};
use super::{ManifestEntry, SegmentWriter};
use crate::errors::ManifestError;
use crate::runner::{ExecutionResult, PhaseStatus};
use crate::security::FeatureName;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writes and reads the per-feature manifests under one directory.
///
/// Paths are derived only from a validated [`FeatureName`].
#[derive(Debug, Clone)]
pub struct ManifestLogger {
    manifest_dir: PathBuf,
    run_id: Option<Uuid>,
}

impl ManifestLogger {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            run_id: None,
        }
    }

    /// Stamp every record written through this logger with `run_id`.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    pub fn manifest_path(&self, feature: &FeatureName) -> PathBuf {
        self.manifest_dir.join(format!("{feature}.jsonl"))
    }

    pub fn segments_dir(&self, feature: &FeatureName) -> PathBuf {
        self.manifest_dir.join(format!("{feature}.segments"))
    }

    fn segment_path(&self, feature: &FeatureName, phase: &str) -> PathBuf {
        self.segments_dir(feature).join(format!("{phase}.jsonl"))
    }

    // ── Writes ───────────────────────────────────────────────────────────

    fn append(&self, feature: &FeatureName, entry: ManifestEntry) -> Result<(), ManifestError> {
        let entry = entry.with_run_id(self.run_id);
        let path = self.manifest_path(feature);
        append_locked(&path, &entry).inspect_err(|e| {
            warn!(feature = %feature, phase = %entry.phase, error = %e, "manifest write failed");
        })?;
        debug!(feature = %feature, phase = %entry.phase, status = %entry.status, "manifest entry appended");
        Ok(())
    }

    /// Append a `started` marker for `phase`.
    pub fn record_start(&self, feature: &FeatureName, phase: &str) -> Result<(), ManifestError> {
        self.append(feature, ManifestEntry::started(phase))
    }

    /// Append a terminal record whose status is `success` iff `exit_code` is zero.
    pub fn record_end(
        &self,
        feature: &FeatureName,
        phase: &str,
        exit_code: i32,
        duration_sec: u64,
    ) -> Result<(), ManifestError> {
        let status = PhaseStatus::from_exit_code(exit_code);
        self.append(
            feature,
            ManifestEntry::finished(phase, status, exit_code, duration_sec),
        )
    }

    /// Append a terminal record carrying the result's own status, so `timeout`
    /// and `killed` are preserved.
    pub fn record_result(
        &self,
        feature: &FeatureName,
        result: &ExecutionResult,
    ) -> Result<(), ManifestError> {
        self.append(feature, ManifestEntry::from_result(result))
    }

    /// Create (or reset) the segment a parallel unit writes its terminal record to.
    pub fn segment_writer(
        &self,
        feature: &FeatureName,
        phase: &str,
    ) -> Result<SegmentWriter, ManifestError> {
        SegmentWriter::create(phase, self.segment_path(feature, phase), self.run_id)
    }

    /// Merge the segments of `phases` into the main manifest, in the given
    /// order, as one locked append. Merged segments are removed.
    ///
    /// Returns the number of records merged.
    pub fn merge_segments(
        &self,
        feature: &FeatureName,
        phases: &[String],
    ) -> Result<usize, ManifestError> {
        let paths: Vec<PathBuf> = phases
            .iter()
            .map(|phase| self.segment_path(feature, phase))
            .collect();
        let merged = self.merge_paths(feature, &paths)?;
        self.remove_segments_dir_if_empty(feature);
        Ok(merged)
    }

    /// Merge segments left behind by an interrupted run. Segment files are
    /// merged in file-name order since their submission order is lost.
    pub fn recover_segments(&self, feature: &FeatureName) -> Result<usize, ManifestError> {
        let dir = self.segments_dir(feature);
        if !dir.is_dir() {
            return Ok(0);
        }
        let read_err = |source| ManifestError::Read {
            path: dir.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();

        let merged = self.merge_paths(feature, &paths)?;
        if merged > 0 {
            info!(feature = %feature, records = merged, "recovered leftover manifest segments");
        }
        self.remove_segments_dir_if_empty(feature);
        Ok(merged)
    }

    fn merge_paths(&self, feature: &FeatureName, paths: &[PathBuf]) -> Result<usize, ManifestError> {
        let mut lines = Vec::new();
        let mut present = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
                path: path.clone(),
                source,
            })?;
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                // Re-serialize so only well-formed single-line records reach the main file.
                let entry =
                    ManifestEntry::parse_line(line).map_err(|reason| ManifestError::Malformed {
                        path: path.clone(),
                        line: idx + 1,
                        content: line.to_string(),
                        reason,
                    })?;
                lines.push(serialize(&entry)?);
            }
            present.push(path.clone());
        }

        if !lines.is_empty() {
            append_lines_locked(&self.manifest_path(feature), &lines)?;
        }
        for path in present {
            fs::remove_file(&path).map_err(|source| ManifestError::Write { path, source })?;
        }
        Ok(lines.len())
    }

    fn remove_segments_dir_if_empty(&self, feature: &FeatureName) {
        // Fails harmlessly when other segments remain or the dir is absent.
        let _ = fs::remove_dir(self.segments_dir(feature));
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// All entries in write order. A missing manifest has no entries; any
    /// unparseable line is an error.
    pub fn entries(&self, feature: &FeatureName) -> Result<Vec<ManifestEntry>, ManifestError> {
        let path = self.manifest_path(feature);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        content
            .lines()
            .enumerate()
            .map(|(idx, line)| {
                ManifestEntry::parse_line(line).map_err(|reason| ManifestError::Malformed {
                    path: path.clone(),
                    line: idx + 1,
                    content: line.to_string(),
                    reason,
                })
            })
            .collect()
    }

    /// Most recent entry for `phase`, if any.
    pub fn query_last_entry(
        &self,
        feature: &FeatureName,
        phase: &str,
    ) -> Result<Option<ManifestEntry>, ManifestError> {
        Ok(self
            .entries(feature)?
            .into_iter()
            .rfind(|entry| entry.phase == phase))
    }

    /// Latest entry per phase.
    pub fn latest_by_phase(
        &self,
        feature: &FeatureName,
    ) -> Result<HashMap<String, ManifestEntry>, ManifestError> {
        let mut latest = HashMap::new();
        for entry in self.entries(feature)? {
            latest.insert(entry.phase.clone(), entry);
        }
        Ok(latest)
    }

    /// Phases whose most recent entry is `success`.
    pub fn successful_phases(
        &self,
        feature: &FeatureName,
    ) -> Result<HashSet<String>, ManifestError> {
        Ok(self
            .latest_by_phase(feature)?
            .into_iter()
            .filter(|(_, entry)| entry.is_success())
            .map(|(phase, _)| phase)
            .collect())
    }

    /// Check that every line parses; returns the number of entries, or the
    /// first offending line.
    pub fn verify_well_formed(&self, feature: &FeatureName) -> Result<usize, ManifestError> {
        self.entries(feature).map(|entries| entries.len())
    }

    pub fn is_well_formed(&self, feature: &FeatureName) -> bool {
        self.verify_well_formed(feature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ManifestLogger, FeatureName) {
        let dir = TempDir::new().unwrap();
        let logger = ManifestLogger::new(dir.path().join("manifests"));
        (dir, logger, FeatureName::parse("auth").unwrap())
    }

    #[test]
    fn test_manifest_path_uses_validated_name() {
        let (dir, logger, feature) = setup();
        assert_eq!(
            logger.manifest_path(&feature),
            dir.path().join("manifests/auth.jsonl")
        );
    }

    #[test]
    fn test_record_end_derives_status_from_exit_code() {
        let (_dir, logger, feature) = setup();
        logger.record_start(&feature, "phase1").unwrap();
        logger.record_end(&feature, "phase1", 0, 3).unwrap();
        logger.record_start(&feature, "phase2").unwrap();
        logger.record_end(&feature, "phase2", 2, 5).unwrap();

        let p1 = logger.query_last_entry(&feature, "phase1").unwrap().unwrap();
        let p2 = logger.query_last_entry(&feature, "phase2").unwrap().unwrap();
        assert_eq!(p1.status, PhaseStatus::Success);
        assert_eq!(p2.status, PhaseStatus::Failed);
        assert_eq!(p2.exit_code, Some(2));
        assert_eq!(p2.duration_sec, Some(5));
    }

    #[test]
    fn test_query_last_entry_returns_most_recent() {
        let (_dir, logger, feature) = setup();
        logger.record_start(&feature, "phase1").unwrap();
        logger.record_end(&feature, "phase1", 1, 1).unwrap();
        logger.record_start(&feature, "phase1").unwrap();
        logger.record_end(&feature, "phase1", 0, 1).unwrap();

        let last = logger.query_last_entry(&feature, "phase1").unwrap().unwrap();
        assert_eq!(last.status, PhaseStatus::Success);
        assert!(logger.query_last_entry(&feature, "phase9").unwrap().is_none());
    }

    #[test]
    fn test_unfinished_phase_reports_started() {
        let (_dir, logger, feature) = setup();
        logger.record_start(&feature, "phase1").unwrap();
        let last = logger.query_last_entry(&feature, "phase1").unwrap().unwrap();
        assert_eq!(last.status, PhaseStatus::Started);
        assert!(logger.successful_phases(&feature).unwrap().is_empty());
    }

    #[test]
    fn test_record_result_preserves_timeout() {
        let (_dir, logger, feature) = setup();
        let result = ExecutionResult::new(
            "phase2b",
            PhaseStatus::Timeout,
            Some(124),
            Duration::from_secs(10),
            1,
        );
        logger.record_result(&feature, &result).unwrap();
        let last = logger.query_last_entry(&feature, "phase2b").unwrap().unwrap();
        assert_eq!(last.status, PhaseStatus::Timeout);
    }

    #[test]
    fn test_successful_phases_uses_latest_status() {
        let (_dir, logger, feature) = setup();
        logger.record_end(&feature, "a", 0, 1).unwrap();
        logger.record_end(&feature, "b", 0, 1).unwrap();
        logger.record_end(&feature, "b", 1, 1).unwrap();

        let ok = logger.successful_phases(&feature).unwrap();
        assert!(ok.contains("a"));
        assert!(!ok.contains("b"));
    }

    #[test]
    fn test_verify_well_formed_reports_offending_line() {
        let (_dir, logger, feature) = setup();
        logger.record_start(&feature, "phase1").unwrap();
        let path = logger.manifest_path(&feature);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"phase\":\"phase1\",\"sta\n");
        fs::write(&path, content).unwrap();

        assert!(!logger.is_well_formed(&feature));
        match logger.verify_well_formed(&feature).unwrap_err() {
            ManifestError::Malformed { line, content, .. } => {
                assert_eq!(line, 2);
                assert!(content.starts_with("{\"phase\""));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_manifest_is_empty_and_well_formed() {
        let (_dir, logger, feature) = setup();
        assert!(logger.entries(&feature).unwrap().is_empty());
        assert_eq!(logger.verify_well_formed(&feature).unwrap(), 0);
    }

    #[test]
    fn test_merge_segments_in_submission_order() {
        let (_dir, logger, feature) = setup();
        let phases: Vec<String> = ["phase2a", "phase2b", "phase2c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        // Writers finish out of order.
        for (phase, code) in [("phase2c", 0), ("phase2a", 0), ("phase2b", 1)] {
            let writer = logger.segment_writer(&feature, phase).unwrap();
            writer
                .append(&ManifestEntry::finished(
                    phase,
                    PhaseStatus::from_exit_code(code),
                    code,
                    1,
                ))
                .unwrap();
        }

        let merged = logger.merge_segments(&feature, &phases).unwrap();
        assert_eq!(merged, 3);

        let order: Vec<String> = logger
            .entries(&feature)
            .unwrap()
            .into_iter()
            .map(|e| e.phase)
            .collect();
        assert_eq!(order, phases);
        assert!(!logger.segments_dir(&feature).exists());
    }

    #[test]
    fn test_recover_segments_merges_leftovers() {
        let (_dir, logger, feature) = setup();
        let writer = logger.segment_writer(&feature, "phase2a").unwrap();
        writer
            .append(&ManifestEntry::finished("phase2a", PhaseStatus::Success, 0, 2))
            .unwrap();

        assert_eq!(logger.recover_segments(&feature).unwrap(), 1);
        assert!(logger.successful_phases(&feature).unwrap().contains("phase2a"));
        assert_eq!(logger.recover_segments(&feature).unwrap(), 0);
    }

    #[test]
    fn test_run_id_is_stamped() {
        let (_dir, logger, feature) = setup();
        let run_id = Uuid::new_v4();
        let logger = logger.with_run_id(run_id);
        logger.record_start(&feature, "phase1").unwrap();
        let entry = logger.query_last_entry(&feature, "phase1").unwrap().unwrap();
        assert_eq!(entry.run_id, Some(run_id));
    }

    #[test]
    fn test_concurrent_writers_produce_parseable_lines() {
        let (_dir, logger, feature) = setup();
        let logger = Arc::new(logger);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let logger = Arc::clone(&logger);
                let feature = feature.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        logger
                            .record_end(&feature, &format!("writer{i}"), j % 2, 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(logger.verify_well_formed(&feature).unwrap(), 160);
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let logger = ManifestLogger::new(&blocker);
        let feature = FeatureName::parse("auth").unwrap();

        let err = logger.record_start(&feature, "phase1").unwrap_err();
        assert!(err.is_write_failure());
    }
}
