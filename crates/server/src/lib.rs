// crates/server/src/lib.rs
//! Chatshell host library.
//!
//! Axum server exposing the migration job API: export the application data
//! directory to a downloadable bundle, or replace it from an uploaded one,
//! as polled background jobs.

pub mod config;
pub mod cors;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{Config, HostSettings};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, uploads) and `/metrics`
/// - CORS for loopback and shell origins (see [`cors`])
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors::cors_layer(&state.jobs.settings().allowed_origins);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn test_app(tmp: &tempfile::TempDir) -> Router {
        let settings = HostSettings::new(tmp.path().join("data"), tmp.path().join("state"));
        create_app(AppState::new(settings).unwrap())
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get(test_app(&tmp), "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert!(json.get("active_job").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, _) = get(test_app(&tmp), "/api/does-not-exist").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn origin_header(app: Router, method: &str, origin: &str) -> Option<String> {
        let mut request = Request::builder()
            .method(method)
            .uri("/api/jobs")
            .header("origin", origin);
        if method == "OPTIONS" {
            request = request.header("access-control-request-method", "POST");
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_allows_loopback_origin() {
        let tmp = tempfile::tempdir().unwrap();
        let origin = "http://localhost:5173";
        assert_eq!(
            origin_header(test_app(&tmp), "GET", origin).await.as_deref(),
            Some(origin)
        );
        assert_eq!(
            origin_header(test_app(&tmp), "OPTIONS", origin).await.as_deref(),
            Some(origin)
        );
    }

    #[tokio::test]
    async fn test_cors_withholds_headers_from_foreign_origin() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(origin_header(test_app(&tmp), "GET", "https://evil.example").await.is_none());
        assert!(origin_header(test_app(&tmp), "OPTIONS", "https://evil.example").await.is_none());
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = HostSettings::new(tmp.path().join("data"), tmp.path().join("state"));
        settings.allowed_origins = vec!["https://chat.example.com".to_string()];
        let app = create_app(AppState::new(settings).unwrap());
        assert_eq!(
            origin_header(app, "GET", "https://chat.example.com").await.as_deref(),
            Some("https://chat.example.com")
        );
    }
}
