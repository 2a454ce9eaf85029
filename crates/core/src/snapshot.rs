// crates/core/src/snapshot.rs
//! Optional on-disk snapshot of the job store.
//!
//! The snapshot is rewritten (temp file + rename) after state transitions.
//! On reload, any job that was still pending or running is marked failed:
//! a restart never silently resumes work.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::types::{Job, JobState};

const SNAPSHOT_VERSION: u32 = 1;
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by a restart of the host";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    jobs: Vec<Job>,
}

/// Write `jobs` to `path` atomically.
pub fn save(path: &Path, jobs: &[Job]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
    }
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        jobs: jobs.to_vec(),
    };
    let json = serde_json::to_vec_pretty(&snapshot).map_err(|e| SnapshotError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| SnapshotError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| SnapshotError::io(path, e))
}

/// Load a snapshot. A missing file yields no jobs.
pub fn load(path: &Path) -> Result<Vec<Job>, SnapshotError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SnapshotError::io(path, e)),
    };
    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Malformed {
            path: path.to_path_buf(),
            message: format!("unsupported snapshot version {}", snapshot.version),
        });
    }
    Ok(snapshot.jobs)
}

/// Reclassify every non-terminal job as failed. Returns how many changed.
pub fn fail_interrupted(jobs: &mut [Job]) -> usize {
    let now = Utc::now();
    let mut count = 0;
    for job in jobs.iter_mut().filter(|j| !j.is_terminal()) {
        job.state = JobState::Failed;
        job.stage = "failed".to_string();
        job.message = INTERRUPTED_MESSAGE.to_string();
        job.error = Some(INTERRUPTED_MESSAGE.to_string());
        job.result = None;
        job.updated_at = now;
        job.finished_at = Some(now);
        count += 1;
    }
    count
}
