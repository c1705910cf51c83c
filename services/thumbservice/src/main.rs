use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use thumbservice::alignment::{Aligner, CommandAligner};
use thumbservice::api::{start_api_server, AppState};
use thumbservice::archive::ArchiveClient;
use thumbservice::config::Config;
use thumbservice::conversion::CommandConverter;
use thumbservice::lifecycle;
use thumbservice::object_store::{S3ObjectStore, ThumbnailStore};
use thumbservice::pipeline::ThumbnailPipeline;
use thumbservice::validator::FrameValidator;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Thumbnail service for archived astronomical frames
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Remove temp files left by a worker that exited
    SweepWorker {
        /// Process ID of the dead worker
        pid: u32,
    },
    /// Remove every file in the temp directory
    SweepAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Arc::new(Config::load().context("Failed to load configuration")?);

    // Initialize logging
    init_tracing(&config.service.log_level);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::SweepWorker { pid } => {
            let removed = lifecycle::sweep_worker(&config.service.tmp_dir, pid)
                .context("Failed to sweep worker temp files")?;
            info!(pid, removed, "Worker temp files removed");
            Ok(())
        }
        Command::SweepAll => {
            let removed = lifecycle::sweep_all(&config.service.tmp_dir)
                .context("Failed to sweep temp directory")?;
            info!(removed, "Temp directory cleared");
            Ok(())
        }
    }
}

async fn serve(config: Arc<Config>) -> Result<()> {
    info!(
        service = %config.service.name,
        "Starting thumbservice"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let tmp_dir = config.service.tmp_dir.clone();
    std::fs::create_dir_all(&tmp_dir).context("Failed to create temp directory")?;
    if config.service.sweep_tmp_on_start {
        let removed = lifecycle::sweep_all(&tmp_dir).context("Failed to sweep temp directory")?;
        if removed > 0 {
            warn!(removed, "Removed temp files left by a previous run");
        }
    }

    // Initialize components
    let archive = Arc::new(
        ArchiveClient::new(&config.archive).context("Failed to initialize archive client")?,
    );
    let object_store = Arc::new(S3ObjectStore::new(&config.s3).await);
    let store = ThumbnailStore::new(object_store, config.presigned_url_expiry());
    let converter = Arc::new(CommandConverter::new(&config.codec));
    let aligner: Option<Arc<dyn Aligner>> = match (&config.alignment.command, config.alignment.enabled) {
        (Some(command), true) => Some(Arc::new(CommandAligner::new(command.clone()))),
        _ => {
            info!("Channel alignment disabled, colour thumbnails use unaligned frames");
            None
        }
    };

    let pipeline = ThumbnailPipeline::new(
        archive,
        store,
        converter,
        aligner,
        FrameValidator::new(&config.validation),
        tmp_dir.clone(),
    );

    let api_state = AppState {
        pipeline: Arc::new(pipeline),
    };

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    // Requests have drained; anything left with our prefix is an orphan
    let removed = lifecycle::sweep_worker(&tmp_dir, std::process::id())
        .context("Failed to sweep temp files on shutdown")?;
    info!(removed, "Thumbservice stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["thumbservice", "sweep-worker", "4242"]).unwrap();
        assert!(matches!(cli.command, Some(Command::SweepWorker { pid: 4242 })));

        let cli = Cli::try_parse_from(["thumbservice"]).unwrap();
        assert!(cli.command.is_none());
    }
}
