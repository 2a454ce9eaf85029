// crates/server/src/routes/jobs.rs
//! API routes for migration jobs.
//!
//! - POST /jobs — Submit an export or import
//! - GET  /jobs — List retained jobs
//! - GET  /jobs/stream — SSE stream of job changes
//! - GET  /jobs/{id} — Job status
//! - POST /jobs/{id}/cancel — Request cancellation
//! - POST /jobs/{id}/cleanup — Forget a finished job and its artifact
//! - GET  /jobs/{id}/artifact — Download a completed export

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatshell_core::api::{Ack, JobStatus, SubmitRequest, SubmitResponse};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/jobs — Validate, claim the migration slot, start the job.
///
/// Validation checks the filesystem and a claimed slot is persisted, so the
/// submission runs on the blocking pool like cleanup.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let jobs = Arc::clone(&state.jobs);
    let job_id = tokio::task::spawn_blocking(move || jobs.submit(request))
        .await
        .map_err(|e| ApiError::Internal(format!("submit task failed: {e}")))??;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// GET /api/jobs — All retained jobs, oldest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatus>> {
    Json(state.jobs.list())
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.jobs.status(&id)?))
}

/// POST /api/jobs/{id}/cancel — Idempotent; a finished job is left as is.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Ack>> {
    state.jobs.cancel(&id)?;
    Ok(Json(Ack {}))
}

/// POST /api/jobs/{id}/cleanup
async fn cleanup_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Ack>> {
    let jobs = Arc::clone(&state.jobs);
    tokio::task::spawn_blocking(move || jobs.cleanup(&id))
        .await
        .map_err(|e| ApiError::Internal(format!("cleanup task failed: {e}")))??;
    Ok(Json(Ack {}))
}

/// GET /api/jobs/{id}/artifact — Stream the staged export archive.
async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.jobs.artifact(&id)?;
    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        tracing::warn!(job_id = %id, error = %e, "Artifact could not be opened");
        ApiError::Conflict(format!("job {id} has no downloadable artifact"))
    })?;

    let headers = [
        (header::CONTENT_TYPE, "application/gzip".to_string()),
        (header::CONTENT_LENGTH, artifact.size_bytes.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// GET /api/jobs/stream — SSE stream of every accepted job change.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.jobs.store().subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(job) => match Event::default().json_data(JobStatus::from(&job)) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode job event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Job stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/cleanup", post(cleanup_job))
        .route("/jobs/{id}/artifact", get(download_artifact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostSettings;
    use axum::http::Request;
    use chatshell_core::{JobKind, JobState};
    use tower::ServiceExt;

    fn test_state(tmp: &tempfile::TempDir) -> Arc<AppState> {
        AppState::new(HostSettings::new(tmp.path().join("data"), tmp.path().join("state"))).unwrap()
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[test]
    fn test_router_creation() {
        let _router = router();
    }

    #[tokio::test]
    async fn test_list_jobs_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = send(app(test_state(&tmp)), "GET", "/api/jobs", Body::empty()).await;

        assert_eq!(status, StatusCode::OK);
        let json: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(json.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let (status, body) = send(app(state.clone()), "POST", "/api/jobs", Body::from("{oops")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Bad request");
        assert!(state.jobs.list().is_empty());
    }

    #[tokio::test]
    async fn test_submit_export_is_accepted_and_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/jobs",
            Body::from(r#"{"kind":"export"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let SubmitResponse { job_id } = serde_json::from_slice(&body).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let job = state.jobs.status(&job_id).unwrap();
            if job.is_terminal() {
                assert_eq!(job.state, JobState::Completed, "{:?}", job.error);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "export never finished");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_submit_without_json_content_type_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/jobs")
                    .header("content-type", "text/plain")
                    .body(Body::from(r#"{"kind":"export"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.jobs.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_404_everywhere_but_cleanup_of_issued() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        for (method, uri) in [
            ("GET", "/api/jobs/nope"),
            ("POST", "/api/jobs/nope/cancel"),
            ("POST", "/api/jobs/nope/cleanup"),
            ("GET", "/api/jobs/nope/artifact"),
        ] {
            let (status, _) = send(app(state.clone()), method, uri, Body::empty()).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_active_job_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let id = state.jobs.store().try_create_exclusive(JobKind::Import).unwrap();

        let submit = Body::from(r#"{"kind":"export"}"#);
        let (status, _) = send(app(state.clone()), "POST", "/api/jobs", submit).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            send(app(state.clone()), "POST", &format!("/api/jobs/{id}/cleanup"), Body::empty()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            send(app(state.clone()), "GET", &format!("/api/jobs/{id}/artifact"), Body::empty()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            send(app(state.clone()), "POST", &format!("/api/jobs/{id}/cancel"), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"{}");
        let job = state.jobs.status(&id).unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.state, JobState::Pending);
    }
}
