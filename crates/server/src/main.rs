// crates/server/src/main.rs
//! Chatshell host binary.
//!
//! Restores the job table (when persistence is on), binds the HTTP server
//! and runs the retention sweeper until Ctrl-C.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chatshell_server::jobs::MigrationService;
use chatshell_server::{create_app, init_metrics, logging, AppState, Config};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    config.validate().map_err(anyhow::Error::msg)?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    let startup_start = Instant::now();
    init_metrics();

    eprintln!("\n\u{1f4e6} chatshell v{}\n", env!("CARGO_PKG_VERSION"));

    let settings = config.settings().map_err(anyhow::Error::msg)?;
    tracing::info!(
        data_dir = %settings.data_dir.display(),
        state_dir = %settings.state_dir.display(),
        persist_jobs = settings.persist_jobs,
        "Starting host"
    );
    let service = Arc::new(
        MigrationService::new(settings).context("failed to restore the job table")?,
    );
    let sweeper =
        service.spawn_retention_sweeper(Duration::from_secs(config.sweep_interval_secs));
    let app = create_app(AppState::with_service(service));

    let addr = config.bind_addr().map_err(anyhow::Error::msg)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener.local_addr()?;

    eprintln!(
        "  \u{2713} Ready in {}ms",
        startup_start.elapsed().as_millis()
    );
    eprintln!("  \u{2192} http://{local}\n");
    tracing::info!(%local, "Host listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Host stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
