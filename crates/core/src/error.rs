// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, JobState};

/// Errors returned by [`crate::store::JobStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid transition for job {id}: {reason}")]
    InvalidTransition { id: JobId, reason: String },

    #[error("Another migration job is still active: {0}")]
    Busy(JobId),
}

impl StoreError {
    pub fn invalid(id: impl Into<JobId>, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn illegal_state(id: &str, from: JobState, to: JobState) -> Self {
        Self::invalid(id, format!("cannot move from {from} to {to}"))
    }
}

/// Errors that can occur while writing or reading a migration bundle.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File is not a chatshell backup archive")]
    NotABundle,

    #[error("Unsupported backup archive version {0}")]
    UnsupportedVersion(u32),

    #[error("Malformed archive entry at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Archive entry has an unsafe path: {0}")]
    UnsafePath(String),

    #[error("Archive contains a duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Archive entry is corrupted: {0}")]
    ChecksumMismatch(String),

    #[error("Archive is incomplete: expected {expected} entries, found {found}")]
    EntryCountMismatch { expected: u64, found: u64 },
}

/// Errors that can occur when loading or saving the job snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error accessing job snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job snapshot {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl SnapshotError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Job not found: abc");

        let err = StoreError::illegal_state("abc", JobState::Completed, JobState::Running);
        assert_eq!(
            err.to_string(),
            "Invalid transition for job abc: cannot move from completed to running"
        );
    }

    #[test]
    fn test_archive_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: ArchiveError = io.into();
        assert!(matches!(err, ArchiveError::Io(_)));
    }

    #[test]
    fn test_entry_count_mismatch_display() {
        let err = ArchiveError::EntryCountMismatch {
            expected: 3,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Archive is incomplete: expected 3 entries, found 1"
        );
    }
}
