// crates/server/src/routes/uploads.rs
//! POST /uploads — accept a backup archive for a later import.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chatshell_core::api::UploadResponse;

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/uploads — Raw archive body; the returned `upload_id` goes into
/// an import's `params.upload_id`.
async fn upload_archive(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let response = state.jobs.save_upload(body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Build the uploads router. Bodies larger than `max_bytes` get `413`.
pub fn router(max_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(upload_archive))
        .layer(DefaultBodyLimit::max(max_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostSettings;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn post_upload(max_bytes: usize, body: &'static [u8]) -> (StatusCode, Vec<u8>) {
        let tmp = tempfile::tempdir().unwrap();
        let state =
            AppState::new(HostSettings::new(tmp.path().join("data"), tmp.path().join("state")))
                .unwrap();
        let app = Router::new()
            .nest("/api", router(max_bytes))
            .with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/uploads")
                    .body(Body::from(body))
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

    #[tokio::test]
    async fn test_upload_returns_id() {
        let (status, body) = post_upload(1024, b"gzip bytes").await;
        assert_eq!(status, StatusCode::CREATED);
        let response: UploadResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.size_bytes, 10);
        assert!(uuid::Uuid::parse_str(&response.upload_id).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let (status, _) = post_upload(4, b"too large").await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (status, _) = post_upload(1024, b"").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
