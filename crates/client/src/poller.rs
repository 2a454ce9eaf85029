// crates/client/src/poller.rs
//! Submit a migration job and follow it to a terminal state.
//!
//! The poller asks for status at a fixed interval, hands every status to a
//! [`ProgressSink`], and turns the final state into a [`Narration`]:
//! success with a summary, an explicit cancellation, or a failure reason.
//! A completed export is downloaded before the job is cleaned up; a
//! completed import only tells the caller to reload.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chatshell_core::api::{JobStatus, SubmitRequest};
use chatshell_core::{JobKind, JobState};
use tokio_util::sync::CancellationToken;

use crate::client::HostClient;
use crate::error::ClientError;
use crate::retry::RetryPolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between two successful status polls.
    pub interval: Duration,
    /// Consecutive failed polls tolerated before giving up.
    /// `max_attempts = 1` stops at the first failure.
    pub poll_retry: RetryPolicy,
    /// Give up watching after this long. The job keeps running on the host.
    pub timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            poll_retry: RetryPolicy::new(3, Duration::from_millis(500)),
            timeout: None,
        }
    }
}

/// Receives every status the poller observes.
pub trait ProgressSink {
    fn on_status(&mut self, status: &JobStatus);

    /// A status poll failed and will be retried.
    fn on_poll_failure(&mut self, attempt: u32, error: &ClientError) {
        tracing::warn!(attempt, error = %error, "Status poll failed, retrying");
    }

    /// Cancellation was sent to the host.
    fn on_cancel_requested(&mut self) {}
}

/// Sink that ignores progress.
impl ProgressSink for () {
    fn on_status(&mut self, _status: &JobStatus) {}
}

/// How a migration ended, as told to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narration {
    Succeeded {
        summary: String,
        /// Where an export archive was saved.
        saved_to: Option<PathBuf>,
        /// Set after an import: the application must reload its state.
        reload_required: bool,
    },
    Cancelled,
    Failed {
        reason: String,
    },
}

impl Narration {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Process exit code for the migrate CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded { .. } => 0,
            Self::Cancelled => 130,
            Self::Failed { .. } => 1,
        }
    }
}

impl fmt::Display for Narration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded {
                summary,
                saved_to,
                reload_required,
            } => {
                write!(f, "Done: {summary}")?;
                if let Some(path) = saved_to {
                    write!(f, "\nSaved to {}", path.display())?;
                }
                if *reload_required {
                    write!(f, "\nRestart the application to load the imported data.")?;
                }
                Ok(())
            }
            Self::Cancelled => f.write_str("Cancelled. No changes were made."),
            Self::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

pub struct Poller {
    client: HostClient,
    config: PollerConfig,
    download_to: PathBuf,
}

impl Poller {
    pub fn new(client: HostClient, config: PollerConfig) -> Self {
        Self {
            client,
            config,
            download_to: PathBuf::from("."),
        }
    }

    /// File or directory that receives a completed export.
    pub fn download_to(mut self, dest: impl Into<PathBuf>) -> Self {
        self.download_to = dest.into();
        self
    }

    pub fn client(&self) -> &HostClient {
        &self.client
    }

    /// Submit `request` and follow it to the end. Never returns an error:
    /// every way of ending is a [`Narration`].
    pub async fn run(
        &self,
        request: &SubmitRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Narration {
        let job_id = match self.client.submit(request).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(kind = %request.kind, error = %e, "Submission rejected");
                return Narration::failed(e.to_string());
            }
        };
        tracing::info!(job_id = %job_id, kind = %request.kind, "Job submitted");

        match self.follow(&job_id, sink, cancel).await {
            Ok(narration) => narration,
            Err(e) => Narration::failed(e.to_string()),
        }
    }

    /// Watch an already submitted job, then finalize it.
    pub async fn follow(
        &self,
        job_id: &str,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Narration, ClientError> {
        let status = self.watch(job_id, sink, cancel).await?;
        self.finalize(&status).await
    }

    /// Poll until the job is terminal and return its last status.
    ///
    /// Cancelling `cancel` sends one cancel request and keeps polling, so the
    /// result reflects what the host actually did.
    pub async fn watch(
        &self,
        job_id: &str,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, ClientError> {
        let started = Instant::now();
        let policy = &self.config.poll_retry;
        let mut failures = 0u32;
        let mut cancel_sent = false;

        loop {
            let wait = match self.client.status(job_id).await {
                Ok(status) => {
                    failures = 0;
                    sink.on_status(&status);
                    if status.is_terminal() {
                        return Ok(status);
                    }
                    self.config.interval
                }
                // The job is gone; retrying cannot bring it back.
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    failures += 1;
                    if !e.is_transient() || !policy.allows_retry(failures) {
                        return Err(ClientError::PollFailed {
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }
                    sink.on_poll_failure(failures, &e);
                    policy.delay_for_attempt(failures)
                }
            };

            if let Some(limit) = self.config.timeout {
                if started.elapsed() >= limit {
                    return Err(ClientError::TimedOut {
                        job_id: job_id.to_string(),
                        waited: started.elapsed(),
                    });
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    sink.on_cancel_requested();
                    match self.client.cancel(job_id).await {
                        Ok(()) => tracing::info!(job_id, "Cancellation requested"),
                        Err(e) => tracing::warn!(job_id, error = %e, "Cancel request failed"),
                    }
                }
            }
        }
    }

    /// Run the kind-specific finishing step for a terminal job.
    async fn finalize(&self, status: &JobStatus) -> Result<Narration, ClientError> {
        let id = status.job_id.as_str();
        let narration = match status.state {
            JobState::Completed => {
                let summary = status
                    .result
                    .as_ref()
                    .map(|r| r.summary())
                    .unwrap_or_else(|| format!("{} finished", status.kind));
                match status.kind {
                    JobKind::Export => {
                        // A failed download leaves the artifact on the host
                        // until retention removes it.
                        let saved = self.client.download_artifact(id, &self.download_to).await?;
                        tracing::info!(job_id = id, path = %saved.display(), "Export saved");
                        Narration::Succeeded {
                            summary,
                            saved_to: Some(saved),
                            reload_required: false,
                        }
                    }
                    JobKind::Import => Narration::Succeeded {
                        summary,
                        saved_to: None,
                        reload_required: true,
                    },
                }
            }
            JobState::Cancelled => Narration::Cancelled,
            JobState::Failed => Narration::failed(
                status
                    .error
                    .clone()
                    .unwrap_or_else(|| "the job failed without a reason".to_string()),
            ),
            JobState::Pending | JobState::Running => {
                return Err(ClientError::Decode(format!(
                    "job {id} is still {}",
                    status.state
                )))
            }
        };

        self.cleanup_quietly(id).await;
        Ok(narration)
    }

    async fn cleanup_quietly(&self, id: &str) {
        if let Err(e) = self.client.cleanup(id).await {
            tracing::warn!(job_id = id, error = %e, "Cleanup failed; the host will expire the job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narration_exit_codes() {
        assert_eq!(
            Narration::Succeeded {
                summary: "x".into(),
                saved_to: None,
                reload_required: false
            }
            .exit_code(),
            0
        );
        assert_eq!(Narration::Cancelled.exit_code(), 130);
        assert_eq!(Narration::failed("x").exit_code(), 1);
    }

    #[test]
    fn test_narration_display() {
        let export = Narration::Succeeded {
            summary: "exported 3 files (10 bytes) to a.chatshell.gz".into(),
            saved_to: Some(PathBuf::from("/tmp/a.chatshell.gz")),
            reload_required: false,
        };
        assert_eq!(
            export.to_string(),
            "Done: exported 3 files (10 bytes) to a.chatshell.gz\nSaved to /tmp/a.chatshell.gz"
        );

        let import = Narration::Succeeded {
            summary: "imported 3 files (10 bytes)".into(),
            saved_to: None,
            reload_required: true,
        };
        assert!(import.to_string().ends_with("load the imported data."));

        assert_eq!(
            Narration::failed("The backup archive is invalid: bad crc").to_string(),
            "Failed: The backup archive is invalid: bad crc"
        );
    }

    #[test]
    fn test_default_config_polls_at_reference_interval() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_millis(1200));
        assert_eq!(config.poll_retry.max_attempts, 3);
        assert!(config.timeout.is_none());
    }
}
