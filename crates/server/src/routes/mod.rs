//! API route handlers for the chatshell host.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod uploads;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: API routes under `/api`, Prometheus at `/metrics`.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs - Submit an export or import job
/// - GET  /api/jobs - List retained jobs
/// - GET  /api/jobs/stream - SSE stream of job changes
/// - GET  /api/jobs/{id} - Job status
/// - POST /api/jobs/{id}/cancel - Request cancellation
/// - POST /api/jobs/{id}/cleanup - Release a finished job and its artifact
/// - GET  /api/jobs/{id}/artifact - Download a completed export
/// - POST /api/uploads - Upload an archive for import
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    let max_upload = state.jobs.settings().max_upload_bytes;
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", uploads::router(max_upload))
        .merge(metrics::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostSettings;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let state =
            AppState::new(HostSettings::new(tmp.path().join("data"), tmp.path().join("state")))
                .unwrap();
        let _router = api_routes(state);
    }
}
