// crates/server/src/jobs/context.rs
//! Handle a running migration uses to report progress and observe cancel.

use std::fmt;
use std::sync::Arc;

use chatshell_core::{JobId, JobPatch, JobStore, StoreError};
use thiserror::Error;

/// Why a migration stopped before producing a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// Cancellation was observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
    /// Human-readable failure reason, shown to the user as-is.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// `"<what>: <cause>"`, e.g. `"Could not read notes/a.md: permission denied"`.
    pub fn failed(what: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Self::Failed(format!("{what}: {cause}"))
    }
}

/// Progress reporter and cancellation probe for one job.
///
/// Every report is also a checkpoint: if cancel was requested the call
/// returns [`JobError::Cancelled`] and the caller unwinds with `?`.
#[derive(Clone)]
pub struct JobContext {
    id: JobId,
    store: Arc<JobStore>,
}

impl JobContext {
    pub fn new(id: JobId, store: Arc<JobStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.store.is_cancel_requested(&self.id) {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Enter a new stage.
    pub fn stage(&self, stage: &str, message: impl Into<String>) -> Result<(), JobError> {
        self.report(JobPatch::new().stage(stage).message(message))
    }

    /// Report progress within the current stage.
    pub fn progress(&self, percent: f64, message: impl Into<String>) -> Result<(), JobError> {
        self.report(JobPatch::new().progress(percent).message(message))
    }

    fn report(&self, patch: JobPatch) -> Result<(), JobError> {
        self.checkpoint()?;
        match self.store.update(&self.id, patch) {
            Ok(_) => Ok(()),
            // Record dropped underneath us: nobody is left to observe the work.
            Err(StoreError::NotFound(_)) => Err(JobError::Cancelled),
            Err(e) => {
                tracing::error!(job_id = %self.id, error = %e, "Progress update rejected");
                Err(JobError::Failed("The job's progress could not be recorded".to_string()))
            }
        }
    }
}
