//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Migration job counters and duration histogram
//! - Helper functions for recording metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use chatshell_core::{JobKind, JobState};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "migration_jobs_submitted_total",
        "Migration jobs accepted, by kind"
    );
    describe_counter!(
        "migration_jobs_finished_total",
        "Migration jobs that reached a terminal state, by kind and state"
    );
    describe_histogram!(
        "migration_job_duration_seconds",
        "Wall time from start to terminal state, by kind"
    );
    describe_gauge!(
        "migration_jobs_retained",
        "Jobs currently held in the job table"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted(kind: JobKind) {
    counter!("migration_jobs_submitted_total", "kind" => kind.as_str()).increment(1);
}

/// Record a job reaching `state` after running for `duration`.
pub fn record_job_finished(kind: JobKind, state: JobState, duration: Duration) {
    counter!(
        "migration_jobs_finished_total",
        "kind" => kind.as_str(),
        "state" => state.as_str()
    )
    .increment(1);
    histogram!("migration_job_duration_seconds", "kind" => kind.as_str())
        .record(duration.as_secs_f64());

    tracing::info!(
        kind = kind.as_str(),
        state = state.as_str(),
        duration_secs = duration.as_secs_f64(),
        "Migration job finished"
    );
}

pub fn record_jobs_retained(count: usize) {
    gauge!("migration_jobs_retained").set(count as f64);
}
