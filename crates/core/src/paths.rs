// crates/core/src/paths.rs
//! Centralized path functions for all host storage locations.
//!
//! Single source of truth — every staged artifact, upload and snapshot path
//! is derived from the state directory here.

use std::path::{Path, PathBuf};

/// Default application data root: `~/.local/share/chatshell/data` (Linux)
/// or `~/Library/Application Support/chatshell/data` (macOS).
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("chatshell").join("data"))
}

/// Default host state root: `~/.cache/chatshell` (Linux) or
/// `~/Library/Caches/chatshell` (macOS).
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("chatshell"))
}

/// Staged export archives: `<state_dir>/artifacts/`.
pub fn artifacts_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("artifacts")
}

/// Directory holding the staged archive of one export job.
pub fn job_artifact_dir(state_dir: &Path, job_id: &str) -> PathBuf {
    artifacts_dir(state_dir).join(job_id)
}

/// Uploaded import archives: `<state_dir>/uploads/`.
pub fn uploads_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("uploads")
}

/// Job snapshot file: `<state_dir>/jobs.json`.
pub fn snapshot_path(state_dir: &Path) -> PathBuf {
    state_dir.join("jobs.json")
}
