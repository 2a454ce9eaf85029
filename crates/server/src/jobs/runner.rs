// crates/server/src/jobs/runner.rs
//! Drives migration jobs from `pending` to a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chatshell_core::{JobId, JobKind, JobPatch, JobResult, JobStore};
use tokio::task::JoinHandle;

use super::context::{JobContext, JobError};
use super::persist::SnapshotWriter;
use crate::metrics::record_job_finished;

/// What a successful migration hands back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub result: JobResult,
    /// File kept for download until the job is cleaned up.
    pub artifact: Option<PathBuf>,
}

impl JobOutput {
    pub fn new(result: JobResult) -> Self {
        Self {
            result,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }
}

/// Spawns migration work and records its outcome.
///
/// The work closure runs on the blocking pool. It reports through the
/// [`JobContext`] and returns the output, [`JobError::Cancelled`], or a
/// human-readable failure. Any partial output must be removed by the work
/// itself before it returns an error.
pub struct JobRunner {
    store: Arc<JobStore>,
    snapshots: Option<Arc<SnapshotWriter>>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, snapshots: Option<Arc<SnapshotWriter>>) -> Self {
        Self { store, snapshots }
    }

    /// Start the pending job `id`.
    pub fn start_job<F>(
        &self,
        id: JobId,
        kind: JobKind,
        first_stage: &'static str,
        work: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(&JobContext) -> Result<JobOutput, JobError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let snapshots = self.snapshots.clone();

        tokio::spawn(async move {
            let started = Instant::now();

            if store.is_cancel_requested(&id) {
                finish(&store, snapshots.as_deref(), &id, kind, JobPatch::cancelled(), started);
                return;
            }
            let begin = JobPatch::running(first_stage).message(format!("Starting {kind}"));
            if let Err(e) = store.update(&id, begin) {
                tracing::error!(job_id = %id, error = %e, "Could not start job");
                return;
            }
            if let Some(writer) = snapshots.as_deref() {
                writer.save(&store);
            }
            tracing::info!(job_id = %id, kind = kind.as_str(), "Migration job started");

            let ctx = JobContext::new(id.clone(), Arc::clone(&store));
            let outcome = tokio::task::spawn_blocking(move || work(&ctx)).await;

            let patch = match outcome {
                Ok(Ok(output)) => {
                    let mut patch = JobPatch::completed(output.result);
                    if let Some(path) = output.artifact {
                        patch = patch.artifact(path);
                    }
                    patch
                }
                Ok(Err(JobError::Cancelled)) => JobPatch::cancelled(),
                Ok(Err(JobError::Failed(reason))) => JobPatch::failed(reason),
                Err(join_err) => {
                    tracing::error!(job_id = %id, error = %join_err, "Migration task panicked");
                    JobPatch::failed("The job stopped unexpectedly")
                }
            };
            finish(&store, snapshots.as_deref(), &id, kind, patch, started);
        })
    }
}

fn finish(
    store: &JobStore,
    snapshots: Option<&SnapshotWriter>,
    id: &str,
    kind: JobKind,
    patch: JobPatch,
    started: Instant,
) {
    match store.update(id, patch) {
        Ok(job) => {
            record_job_finished(kind, job.state, started.elapsed());
            if let Some(error) = &job.error {
                tracing::warn!(job_id = %id, error = %error, "Migration job failed");
            }
        }
        Err(e) => tracing::error!(job_id = %id, error = %e, "Could not record job outcome"),
    }
    if let Some(writer) = snapshots {
        writer.save(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatshell_core::{ExportSummary, ImportSummary, JobState};
    use std::sync::mpsc;
    use std::time::Duration;

    fn export_result() -> JobResult {
        JobResult::Export(ExportSummary {
            file_name: "a.chatshell.gz".to_string(),
            size_bytes: 10,
            entry_count: 1,
        })
    }

    fn runner() -> (Arc<JobStore>, JobRunner) {
        let store = Arc::new(JobStore::new());
        (Arc::clone(&store), JobRunner::new(store, None))
    }

    #[tokio::test]
    async fn test_job_runner_start_and_complete() {
        let (store, runner) = runner();
        let id = store.create(JobKind::Export);

        runner
            .start_job(id.clone(), JobKind::Export, "scanning", |ctx| {
                ctx.progress(50.0, "halfway")?;
                Ok(JobOutput::new(export_result()).with_artifact("/tmp/a.chatshell.gz"))
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress_percent, 100.0);
        assert_eq!(job.result, Some(export_result()));
        assert_eq!(job.artifact, Some(PathBuf::from("/tmp/a.chatshell.gz")));
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_job_runner_failure() {
        let (store, runner) = runner();
        let id = store.create(JobKind::Import);

        runner
            .start_job(id.clone(), JobKind::Import, "verifying", |_ctx| {
                Err(JobError::Failed("The backup archive is invalid".to_string()))
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("The backup archive is invalid"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_work() {
        let (store, runner) = runner();
        let id = store.create(JobKind::Export);
        store.request_cancel(&id).unwrap();

        runner
            .start_job(id.clone(), JobKind::Export, "scanning", |_ctx| {
                panic!("work must not run for a job cancelled before start")
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.result.is_none() && job.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_observed_at_checkpoint() {
        let (store, runner) = runner();
        let id = store.create(JobKind::Import);
        let (started_tx, started_rx) = mpsc::channel();

        let handle = runner.start_job(id.clone(), JobKind::Import, "extracting", move |ctx| {
            started_tx.send(()).unwrap();
            loop {
                ctx.checkpoint()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();
        store.request_cancel(&id).unwrap();
        handle.await.unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.cancel_requested);
    }

    #[tokio::test]
    async fn test_panicking_work_fails_job() {
        let (store, runner) = runner();
        let id = store.create(JobKind::Import);

        runner
            .start_job(id.clone(), JobKind::Import, "extracting", |_ctx| -> Result<JobOutput, JobError> {
                panic!("boom")
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("The job stopped unexpectedly"));
    }

    #[tokio::test]
    async fn test_outcome_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let writer = Arc::new(SnapshotWriter::new(tmp.path().join("jobs.json")));
        let runner = JobRunner::new(Arc::clone(&store), Some(Arc::clone(&writer)));
        let id = store.create(JobKind::Import);

        runner
            .start_job(id.clone(), JobKind::Import, "extracting", |_ctx| {
                Ok(JobOutput::new(JobResult::Import(ImportSummary {
                    entry_count: 2,
                    bytes_written: 7,
                })))
            })
            .await
            .unwrap();

        let restored = writer.restore().unwrap();
        assert_eq!(restored.get(&id).unwrap().state, JobState::Completed);
    }
}
