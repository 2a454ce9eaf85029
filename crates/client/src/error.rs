// crates/client/src/error.rs
//! Errors raised while talking to the host.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got an HTTP response (refused, reset, timed out).
    #[error("could not reach the host: {0}")]
    Network(#[from] reqwest::Error),

    /// The host answered with a non-success status.
    #[error("{message} (status {status})")]
    Api { status: u16, message: String },

    /// A success response whose body did not match the API.
    #[error("unexpected response from the host: {0}")]
    Decode(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the host did not become ready after {attempts} attempts")]
    HostUnavailable { attempts: u32 },

    #[error("lost contact with the host after {attempts} failed status checks: {last}")]
    PollFailed {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    #[error("gave up waiting for job {job_id} after {}s", waited.as_secs())]
    TimedOut { job_id: String, waited: Duration },
}

impl ClientError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Worth retrying: the host may simply not be reachable or ready yet.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ClientError {
        ClientError::Api {
            status,
            message: "Conflict: job is still running".into(),
        }
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            api(409).to_string(),
            "Conflict: job is still running (status 409)"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(api(503).is_transient());
        assert!(api(429).is_transient());
        assert!(!api(404).is_transient());
        assert!(!api(400).is_transient());
        assert!(!ClientError::Decode("x".into()).is_transient());
        assert!(api(404).is_not_found());
    }

    #[test]
    fn test_poll_failed_display_includes_cause() {
        let err = ClientError::PollFailed {
            attempts: 3,
            last: Box::new(api(502)),
        };
        assert!(err.to_string().starts_with("lost contact with the host after 3 failed"));
        assert!(err.to_string().contains("status 502"));
    }
}
