// crates/server/src/jobs/service.rs
//! Migration job service: the operations behind `/api/jobs` and `/api/uploads`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chatshell_core::api::{ImportParams, JobStatus, SubmitRequest, UploadResponse};
use chatshell_core::archive::BUNDLE_EXTENSION;
use chatshell_core::data_dir::{self, discard_dir};
use chatshell_core::{paths, JobId, JobKind, JobResult, JobState, JobStore, SnapshotError, StoreError};
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::persist::SnapshotWriter;
use super::runner::JobRunner;
use super::{export, import};
use crate::config::HostSettings;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{record_job_submitted, record_jobs_retained};

/// Where an import reads its bundle from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportSource {
    /// Archive already on the host's filesystem; left in place.
    Path(PathBuf),
    /// Archive sent through `POST /api/uploads`; consumed by the import.
    Upload(PathBuf),
}

impl ImportSource {
    fn path(&self) -> &Path {
        match self {
            Self::Path(p) | Self::Upload(p) => p,
        }
    }
}

/// A downloadable export artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

pub struct MigrationService {
    store: Arc<JobStore>,
    runner: JobRunner,
    snapshots: Option<Arc<SnapshotWriter>>,
    settings: HostSettings,
}

impl MigrationService {
    /// Build the service, restoring the job table when persistence is on and
    /// repairing leftovers of a previous run.
    pub fn new(settings: HostSettings) -> Result<Self, SnapshotError> {
        let snapshots = settings
            .persist_jobs
            .then(|| Arc::new(SnapshotWriter::new(paths::snapshot_path(&settings.state_dir))));
        let store = match &snapshots {
            Some(writer) => Arc::new(writer.restore()?),
            None => Arc::new(JobStore::new()),
        };
        let runner = JobRunner::new(Arc::clone(&store), snapshots.clone());
        let service = Self {
            store,
            runner,
            snapshots,
            settings,
        };
        service.recover_leftovers();
        service.persist();
        Ok(service)
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate `request`, claim the migration slot and start the job.
    ///
    /// Validation happens before the slot is claimed: a rejected request
    /// never creates a job record.
    pub fn submit(&self, request: SubmitRequest) -> ApiResult<JobId> {
        let kind = JobKind::parse(&request.kind).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "unknown job kind '{}'; expected 'import' or 'export'",
                request.kind
            ))
        })?;
        let source = match kind {
            JobKind::Export => None,
            JobKind::Import => Some(self.resolve_import_source(request.params)?),
        };

        let id = self.store.try_create_exclusive(kind)?;
        record_job_submitted(kind);
        self.persist();
        tracing::info!(job_id = %id, kind = kind.as_str(), "Migration job accepted");

        match source {
            None => {
                let data_dir = self.settings.data_dir.clone();
                let out_dir = paths::job_artifact_dir(&self.settings.state_dir, &id);
                self.runner.start_job(id.clone(), kind, "scanning", move |ctx| {
                    export::run(ctx, &data_dir, &out_dir)
                });
            }
            Some(source) => {
                let data_dir = self.settings.data_dir.clone();
                self.runner.start_job(id.clone(), kind, "verifying", move |ctx| {
                    let outcome = import::run(ctx, source.path(), &data_dir);
                    if let ImportSource::Upload(path) = &source {
                        if let Err(e) = std::fs::remove_file(path) {
                            tracing::warn!(error = %e, path = %path.display(), "Failed to remove consumed upload");
                        }
                    }
                    outcome
                });
            }
        }
        Ok(id)
    }

    pub fn status(&self, id: &str) -> ApiResult<JobStatus> {
        let job = self.store.get(id)?;
        Ok(JobStatus::from(&job))
    }

    /// Every retained job, oldest first.
    pub fn list(&self) -> Vec<JobStatus> {
        self.store.list().iter().map(JobStatus::from).collect()
    }

    /// Request cancellation. Repeating it, or cancelling a finished job, is a
    /// successful no-op.
    pub fn cancel(&self, id: &str) -> ApiResult<JobStatus> {
        let job = self.store.request_cancel(id)?;
        if !job.is_terminal() {
            tracing::info!(job_id = %id, "Cancellation requested");
            self.persist();
        }
        Ok(JobStatus::from(&job))
    }

    /// Forget a finished job and delete its artifact.
    ///
    /// Repeating cleanup for an id this host issued is a no-op; an id it never
    /// issued is not found. Active jobs must be cancelled first.
    pub fn cleanup(&self, id: &str) -> ApiResult<()> {
        match self.store.get(id) {
            Ok(job) if !job.is_terminal() => Err(ApiError::Conflict(format!(
                "job {id} is still {}; cancel it and wait for it to stop first",
                job.state
            ))),
            Ok(job) => {
                self.store.remove(id);
                self.release_files(&job.id);
                self.persist();
                tracing::info!(job_id = %id, "Job cleaned up");
                Ok(())
            }
            Err(StoreError::NotFound(_)) if self.store.was_issued(id) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ApiError::JobNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// The staged archive of a completed export.
    pub fn artifact(&self, id: &str) -> ApiResult<Artifact> {
        let job = self.store.get(id)?;
        let unavailable = || {
            ApiError::Conflict(format!("job {id} has no downloadable artifact"))
        };
        if job.state != JobState::Completed {
            return Err(unavailable());
        }
        let path = job.artifact.clone().ok_or_else(unavailable)?;
        let size_bytes = std::fs::metadata(&path)
            .map_err(|e| {
                tracing::warn!(job_id = %id, error = %e, "Artifact missing on disk");
                unavailable()
            })?
            .len();
        let file_name = match &job.result {
            Some(JobResult::Export(summary)) => summary.file_name.clone(),
            _ => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{id}.{BUNDLE_EXTENSION}")),
        };
        Ok(Artifact {
            path,
            file_name,
            size_bytes,
        })
    }

    /// Store an uploaded bundle for a later import.
    pub async fn save_upload(&self, body: Bytes) -> ApiResult<UploadResponse> {
        if body.is_empty() {
            return Err(ApiError::BadRequest("upload body is empty".to_string()));
        }
        let upload_id = Uuid::new_v4();
        let path = upload_path(&self.settings.state_dir, &upload_id);
        let dir = paths::uploads_dir(&self.settings.state_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ApiError::Internal(format!("create {}: {e}", dir.display())))?;
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| ApiError::Internal(format!("write {}: {e}", path.display())))?;
        tracing::info!(upload_id = %upload_id, size_bytes = body.len(), "Upload stored");
        Ok(UploadResponse {
            upload_id: upload_id.to_string(),
            size_bytes: body.len() as u64,
        })
    }

    /// Drop jobs finished longer than the retention period ago, with their
    /// artifacts, and uploads nobody imported. Returns how many jobs went.
    pub fn sweep(&self) -> usize {
        let expired = self.store.sweep_expired(self.settings.retention, Utc::now());
        for job in &expired {
            tracing::info!(job_id = %job.id, state = job.state.as_str(), "Retention expired");
            self.release_files(&job.id);
        }
        if !expired.is_empty() {
            self.persist();
        }
        self.sweep_uploads();
        record_jobs_retained(self.store.list().len());
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the blocking pool.
    pub fn spawn_retention_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let svc = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || svc.sweep()).await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(removed = n, "Retention sweep"),
                    Err(e) => tracing::error!(error = %e, "Retention sweep panicked"),
                }
            }
        })
    }

    fn resolve_import_source(&self, params: serde_json::Value) -> ApiResult<ImportSource> {
        const MISSING: &str = "import requires params.source or params.upload_id";
        if params.is_null() {
            return Err(ApiError::BadRequest(MISSING.to_string()));
        }
        let params: ImportParams = serde_json::from_value(params)
            .map_err(|e| ApiError::BadRequest(format!("invalid import params: {e}")))?;

        match (params.source, params.upload_id) {
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "give either params.source or params.upload_id, not both".to_string(),
            )),
            (None, None) => Err(ApiError::BadRequest(MISSING.to_string())),
            (Some(source), None) => {
                if source.trim().is_empty() {
                    return Err(ApiError::BadRequest(MISSING.to_string()));
                }
                let path = PathBuf::from(source);
                if !path.is_file() {
                    return Err(ApiError::BadRequest(format!(
                        "source archive not found: {}",
                        path.display()
                    )));
                }
                Ok(ImportSource::Path(path))
            }
            (None, Some(upload_id)) => {
                let unknown = || ApiError::BadRequest(format!("unknown upload_id '{upload_id}'"));
                let parsed = Uuid::parse_str(&upload_id).map_err(|_| unknown())?;
                let path = upload_path(&self.settings.state_dir, &parsed);
                if !path.is_file() {
                    return Err(unknown());
                }
                Ok(ImportSource::Upload(path))
            }
        }
    }

    fn release_files(&self, id: &str) {
        discard_dir(&paths::job_artifact_dir(&self.settings.state_dir, id));
    }

    fn sweep_uploads(&self) {
        let dir = paths::uploads_dir(&self.settings.state_dir);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return;
        };
        let cutoff = SystemTime::now()
            .checked_sub(self.settings.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        for entry in entries.flatten() {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|modified| modified < cutoff);
            if stale {
                tracing::info!(path = %entry.path().display(), "Removing unused upload");
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::warn!(error = %e, "Failed to remove upload");
                }
            }
        }
    }

    /// Artifact folders without a job and half-finished imports from a
    /// previous run.
    fn recover_leftovers(&self) {
        if let Err(e) = data_dir::recover(&self.settings.data_dir) {
            tracing::error!(error = %e, "Could not repair an interrupted import");
        }
        let artifacts = paths::artifacts_dir(&self.settings.state_dir);
        let Ok(entries) = std::fs::read_dir(&artifacts) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.store.get(&name).is_err() {
                tracing::info!(job_id = %name, "Removing artifact of a forgotten job");
                discard_dir(&entry.path());
            }
        }
    }

    fn persist(&self) {
        if let Some(writer) = &self.snapshots {
            writer.save(&self.store);
        }
    }
}

fn upload_path(state_dir: &Path, upload_id: &Uuid) -> PathBuf {
    paths::uploads_dir(state_dir).join(format!("{upload_id}.{BUNDLE_EXTENSION}"))
}
