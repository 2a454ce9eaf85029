// crates/server/src/jobs/persist.rs
//! Optional job-table persistence on top of `chatshell_core::snapshot`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chatshell_core::{snapshot, JobStore, SnapshotError};

/// Serializes snapshot writes so two transitions never race on the temp file.
pub struct SnapshotWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous table. Jobs that were still active when the host
    /// stopped come back as failed.
    pub fn restore(&self) -> Result<JobStore, SnapshotError> {
        let mut jobs = snapshot::load(&self.path)?;
        let interrupted = snapshot::fail_interrupted(&mut jobs);
        if interrupted > 0 {
            tracing::warn!(
                count = interrupted,
                "Marked jobs interrupted by the previous shutdown as failed"
            );
        }
        tracing::info!(jobs = jobs.len(), path = %self.path.display(), "Restored job table");
        Ok(JobStore::from_jobs(jobs))
    }

    /// Write the current table. Failures are logged, never propagated: a
    /// missed snapshot must not fail the job that triggered it.
    pub fn save(&self, store: &JobStore) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = snapshot::save(&self.path, &store.list()) {
            tracing::warn!(error = %e, "Failed to persist job table");
        }
    }
}
