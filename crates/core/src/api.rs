// crates/core/src/api.rs
//! Wire types of the migration job API, shared by the host and the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Job, JobId, JobKind, JobResult, JobState};

/// Body of `POST /api/jobs`.
///
/// `kind` stays a string so an unknown kind is reported as a bad request
/// instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl SubmitRequest {
    pub fn export() -> Self {
        Self {
            kind: JobKind::Export.as_str().to_string(),
            params: serde_json::Value::Null,
        }
    }

    /// Import from an archive path on the host's filesystem.
    pub fn import_path(source: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Import.as_str().to_string(),
            params: serde_json::json!({ "source": source.into() }),
        }
    }

    /// Import from an archive previously sent to `POST /api/uploads`.
    pub fn import_upload(upload_id: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Import.as_str().to_string(),
            params: serde_json::json!({ "upload_id": upload_id.into() }),
        }
    }
}

/// Import parameters. Exactly one of the two sources must be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportParams {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

/// `202` body of `POST /api/jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Body of `GET /api/jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub stage: String,
    pub message: String,
    pub progress_percent: f64,
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind,
            state: job.state,
            stage: job.stage.clone(),
            message: job.message.clone(),
            progress_percent: job.progress_percent,
            cancel_requested: job.cancel_requested,
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// `201` body of `POST /api/uploads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub upload_id: String,
    pub size_bytes: u64,
}

/// Empty JSON object returned by cancel and cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
