// crates/client/src/main.rs
//! `chatshell-migrate`: drive an export or import on a running host.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chatshell_client::cli::{Cli, Command};
use chatshell_client::progress::{status_line, TerminalProgress};
use chatshell_client::{HostClient, Narration, Poller};
use chatshell_core::api::SubmitRequest;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let client = HostClient::with_base_url(&cli.server)?;
    let health = client
        .wait_ready(&cli.connect_policy())
        .await
        .with_context(|| format!("no chatshell host at {}", cli.server))?;
    tracing::debug!(version = %health.version, "Connected to host");

    match &cli.command {
        Command::Status { id } => {
            println!("{}", status_line(&client.status(id).await?));
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel { id } => {
            client.cancel(id).await?;
            println!("Cancellation requested for {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            for job in client.list().await? {
                println!("{}", status_line(&job));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { out } => {
            let poller = Poller::new(client, cli.poller_config())
                .download_to(out.clone().unwrap_or_else(|| ".".into()));
            migrate(&poller, SubmitRequest::export(), "export").await
        }
        Command::Import { archive, upload } => {
            let poller = Poller::new(client, cli.poller_config());
            let request = import_request(&poller, archive, *upload).await?;
            migrate(&poller, request, "import").await
        }
    }
}

async fn import_request(poller: &Poller, archive: &Path, upload: bool) -> Result<SubmitRequest> {
    if upload {
        eprintln!("  \u{2191} Uploading {}", archive.display());
        let uploaded = poller.client().upload(archive).await?;
        return Ok(SubmitRequest::import_upload(uploaded.upload_id));
    }
    // The host resolves the path on its own filesystem.
    let absolute = std::path::absolute(archive)
        .with_context(|| format!("invalid archive path {}", archive.display()))?;
    Ok(SubmitRequest::import_path(absolute.to_string_lossy()))
}

async fn migrate(poller: &Poller, request: SubmitRequest, label: &str) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut progress = TerminalProgress::start(label)?;
    let narration = poller.run(&request, &mut progress, &cancel).await;
    progress.finish();

    match &narration {
        Narration::Failed { .. } => eprintln!("  \u{2717} {narration}"),
        _ => eprintln!("  \u{2713} {narration}"),
    }
    Ok(ExitCode::from(narration.exit_code() as u8))
}
