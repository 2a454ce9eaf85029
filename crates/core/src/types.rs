// crates/core/src/types.rs
//! Migration job model shared by the store, the host runner and the client.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier (UUID v4 rendered as a string).
pub type JobId = String;

/// Which bulk operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    /// Parse a wire value. Returns `None` for unknown kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// `pending -> running -> {completed | failed | cancelled}`. A pending job
/// may also go straight to `failed` (could not start) or `cancelled`
/// (cancel observed before start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state graph has an edge `self -> next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub file_name: String,
    pub size_bytes: u64,
    pub entry_count: u64,
}

/// Summary of a finished import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub entry_count: u64,
    pub bytes_written: u64,
}

/// Operation-specific payload of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Export(ExportSummary),
    Import(ImportSummary),
}

impl JobResult {
    /// One-line human summary used by logs and the migrate CLI.
    pub fn summary(&self) -> String {
        match self {
            Self::Export(s) => format!(
                "exported {} files ({} bytes) to {}",
                s.entry_count, s.size_bytes, s.file_name
            ),
            Self::Import(s) => format!(
                "imported {} files ({} bytes)",
                s.entry_count, s.bytes_written
            ),
        }
    }
}

/// Full job record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub stage: String,
    pub progress_percent: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
    /// Staged export file, owned by the job until cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            state: JobState::Pending,
            stage: "queued".to_string(),
            progress_percent: 0.0,
            message: format!("Waiting to start {kind}"),
            result: None,
            error: None,
            cancel_requested: false,
            artifact: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Partial update applied through [`crate::store::JobStore::update`].
///
/// Built with the chained setters:
/// `JobPatch::new().stage("packing").progress(40.0)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub progress_percent: Option<f64>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub artifact: Option<PathBuf>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(stage: impl Into<String>) -> Self {
        Self::new().state(JobState::Running).stage(stage)
    }

    pub fn completed(result: JobResult) -> Self {
        let message = result.summary();
        Self {
            state: Some(JobState::Completed),
            stage: Some("done".to_string()),
            message: Some(message),
            progress_percent: Some(100.0),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            state: Some(JobState::Failed),
            stage: Some("failed".to_string()),
            message: Some(error.clone()),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::new()
            .state(JobState::Cancelled)
            .stage("cancelled")
            .message("Cancelled by user")
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress_percent = Some(percent);
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }
}
