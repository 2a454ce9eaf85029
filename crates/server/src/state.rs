// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use chatshell_core::SnapshotError;

use crate::config::HostSettings;
use crate::jobs::MigrationService;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Migration jobs: the single source of truth for every job record.
    pub jobs: Arc<MigrationService>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(settings: HostSettings) -> Result<Arc<Self>, SnapshotError> {
        let jobs = Arc::new(MigrationService::new(settings)?);
        Ok(Self::with_service(jobs))
    }

    /// Wrap an existing service (the caller keeps a handle for background tasks).
    pub fn with_service(jobs: Arc<MigrationService>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
