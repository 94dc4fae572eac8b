//! Locked single-line appends and per-writer manifest segments.

use super::ManifestEntry;
use crate::errors::ManifestError;
use crate::runner::ExecutionResult;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Open `path` for appending, creating it and its parent directory if needed.
pub(super) fn open_append(path: &Path) -> Result<File, ManifestError> {
    let write_err = |source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)
}

pub(super) fn serialize(entry: &ManifestEntry) -> Result<String, ManifestError> {
    let mut line = serde_json::to_string(entry).map_err(|source| ManifestError::Serialize {
        phase: entry.phase.clone(),
        source,
    })?;
    line.push('\n');
    Ok(line)
}

/// Append pre-serialized lines while holding an exclusive lock on the file.
pub(super) fn append_lines_locked(path: &Path, lines: &[String]) -> Result<(), ManifestError> {
    let mut file = open_append(path)?;
    FileExt::lock_exclusive(&file).map_err(|source| ManifestError::Lock {
        path: path.to_path_buf(),
        source,
    })?;

    let written = write_lines(&mut file, lines);

    // The lock is released when the handle closes even if this fails.
    let _ = FileExt::unlock(&file);
    written.map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_lines(file: &mut File, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        file.write_all(line.as_bytes())?;
    }
    file.flush()?;
    file.sync_data()
}

pub(super) fn append_locked(path: &Path, entry: &ManifestEntry) -> Result<(), ManifestError> {
    append_lines_locked(path, &[serialize(entry)?])
}

/// Write handle for one phase's segment. Owned by exactly one writer.
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    phase: String,
    path: PathBuf,
    run_id: Option<Uuid>,
}

impl SegmentWriter {
    pub(super) fn create(
        phase: &str,
        path: PathBuf,
        run_id: Option<Uuid>,
    ) -> Result<Self, ManifestError> {
        let write_err = |source| ManifestError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        File::create(&path).map_err(write_err)?;
        Ok(Self {
            phase: phase.to_string(),
            path,
            run_id,
        })
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ManifestEntry) -> Result<(), ManifestError> {
        append_locked(&self.path, &entry.clone().with_run_id(self.run_id))
    }

    /// Record a unit's terminal result into this segment.
    pub fn append_result(&self, result: &ExecutionResult) -> Result<(), ManifestError> {
        self.append(&ManifestEntry::from_result(result))
    }
}
