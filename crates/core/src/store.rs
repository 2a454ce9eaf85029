// crates/core/src/store.rs
//! Authoritative in-memory map of migration jobs.
//!
//! The store is pure state: it never touches the network or the disk.
//! Every accepted update is validated against the job state graph before
//! anything is mutated, then broadcast to subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::types::{Job, JobId, JobKind, JobPatch, JobState};

/// Thread-safe job registry.
///
/// Reads (`get`, `list`) take a shared lock; writers hold the exclusive lock
/// only for the duration of one validated patch.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    /// Every id ever handed out, including ones already removed.
    issued: RwLock<HashSet<JobId>>,
    events: broadcast::Sender<Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::from_jobs(Vec::new())
    }

    /// Build a store around previously persisted jobs.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let (events, _) = broadcast::channel(256);
        let issued = jobs.iter().map(|j| j.id.clone()).collect();
        let jobs = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Self {
            jobs: RwLock::new(jobs),
            issued: RwLock::new(issued),
            events,
        }
    }

    /// Insert a fresh `pending` job and return its id.
    pub fn create(&self, kind: JobKind) -> JobId {
        let job = self.new_job(kind);
        let id = job.id.clone();
        self.write_jobs().insert(id.clone(), job.clone());
        self.publish(job);
        id
    }

    /// Like [`create`](Self::create), but refuses while any job is still
    /// non-terminal. The check and the insert happen under one lock.
    pub fn try_create_exclusive(&self, kind: JobKind) -> Result<JobId, StoreError> {
        let job = {
            let mut jobs = self.write_jobs();
            if let Some(active) = jobs.values().find(|j| !j.is_terminal()) {
                return Err(StoreError::Busy(active.id.clone()));
            }
            let job = self.new_job(kind);
            jobs.insert(job.id.clone(), job.clone());
            job
        };
        let id = job.id.clone();
        self.publish(job);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.read_jobs()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Apply a partial update.
    ///
    /// Fails with `InvalidTransition` when the job is already terminal, when
    /// `patch.state` is not an edge of the state graph (this includes a second
    /// `running`), or when `result`/`error` are set without the matching
    /// terminal transition. Progress never decreases and is clamped to
    /// `[0, 100]`.
    pub fn update(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let job = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            validate_patch(job, &patch)?;
            apply_patch(job, patch, Utc::now());
            job.clone()
        };
        self.publish(job.clone());
        Ok(job)
    }

    /// Flag the job for cancellation.
    ///
    /// Terminal jobs are returned untouched; repeating the request is a no-op.
    pub fn request_cancel(&self, id: &str) -> Result<Job, StoreError> {
        let (job, changed) = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let changed = !job.is_terminal() && !job.cancel_requested;
            if changed {
                job.cancel_requested = true;
                job.message = "Cancelling...".to_string();
                job.updated_at = Utc::now();
            }
            (job.clone(), changed)
        };
        if changed {
            self.publish(job.clone());
        }
        Ok(job)
    }

    /// Whether cancellation was requested. Unknown ids count as cancelled so a
    /// runner whose record vanished stops at its next checkpoint.
    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.read_jobs()
            .get(id)
            .map(|j| j.cancel_requested)
            .unwrap_or(true)
    }

    /// Delete a record. Idempotent; returns the removed job if there was one.
    pub fn remove(&self, id: &str) -> Option<Job> {
        self.write_jobs().remove(id)
    }

    /// Whether this store ever issued `id` (even if it was removed since).
    pub fn was_issued(&self, id: &str) -> bool {
        self.issued
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// The job currently holding the migration slot, if any.
    pub fn active(&self) -> Option<Job> {
        self.read_jobs().values().find(|j| !j.is_terminal()).cloned()
    }

    /// Remove terminal jobs that finished more than `retention` before `now`.
    /// Returns the removed records so the caller can release their artifacts.
    pub fn sweep_expired(&self, retention: Duration, now: DateTime<Utc>) -> Vec<Job> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.write_jobs();
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| {
                j.finished_at
                    .is_some_and(|finished| now.signed_duration_since(finished) > retention)
            })
            .map(|j| j.id.clone())
            .collect();
        expired.iter().filter_map(|id| jobs.remove(id)).collect()
    }

    /// Subscribe to every accepted change.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.events.subscribe()
    }

    fn new_job(&self, kind: JobKind) -> Job {
        let id = uuid::Uuid::new_v4().to_string();
        self.issued
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        Job::new(id, kind)
    }

    fn publish(&self, job: Job) {
        // No subscribers is fine.
        let _ = self.events.send(job);
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading jobs map, recovering");
            e.into_inner()
        })
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing jobs map, recovering");
            e.into_inner()
        })
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_patch(job: &Job, patch: &JobPatch) -> Result<(), StoreError> {
    if job.is_terminal() {
        return Err(StoreError::invalid(
            &job.id,
            format!("job already finished as {}", job.state),
        ));
    }
    if let Some(next) = patch.state {
        if !job.state.can_transition_to(next) {
            return Err(StoreError::illegal_state(&job.id, job.state, next));
        }
    }
    if patch.result.is_some() != (patch.state == Some(JobState::Completed)) {
        return Err(StoreError::invalid(
            &job.id,
            "a result is set exactly when the job completes",
        ));
    }
    if patch.error.is_some() != (patch.state == Some(JobState::Failed)) {
        return Err(StoreError::invalid(
            &job.id,
            "an error is set exactly when the job fails",
        ));
    }
    Ok(())
}

fn apply_patch(job: &mut Job, patch: JobPatch, now: DateTime<Utc>) {
    if let Some(stage) = patch.stage {
        job.stage = stage;
    }
    if let Some(message) = patch.message {
        job.message = message;
    }
    if let Some(percent) = patch.progress_percent {
        if !percent.is_nan() {
            job.progress_percent = job.progress_percent.max(percent.clamp(0.0, 100.0));
        }
    }
    if patch.artifact.is_some() {
        job.artifact = patch.artifact;
    }
    if let Some(state) = patch.state {
        job.state = state;
        if state == JobState::Completed {
            job.progress_percent = 100.0;
        }
        if state.is_terminal() {
            job.finished_at = Some(now);
        }
    }
    if patch.result.is_some() {
        job.result = patch.result;
    }
    if patch.error.is_some() {
        job.error = patch.error;
    }
    job.updated_at = now;
}
