// crates/server/src/routes/metrics.rs
//! `GET /metrics`: migration job metrics in Prometheus text format.
//!
//! Lives outside `/api` because scrapers expect the conventional path.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::metrics::{record_jobs_retained, render_metrics};
use crate::state::AppState;

/// Refreshes the retained-jobs gauge from the store, then renders. `503`
/// until the recorder is installed.
async fn scrape(State(state): State<Arc<AppState>>) -> Response {
    record_jobs_retained(state.jobs.list().len());
    let Some(body) = render_metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}
