//! TaskSync Server - Main entry point.
//!
//! This binary starts the sync engine with:
//! - Structured JSON logging for production
//! - File watching for the repositories listed in `TASKSYNC_REPOSITORIES`
//! - WebSocket broadcasting on `/ws`
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`tasksync_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! TASKSYNC_REPOSITORIES="/home/me/project-a,/home/me/project-b" \
//! PORT=3001 \
//! cargo run --release --bin tasksync-server
//! ```

use std::process::ExitCode;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tasksync_server::broadcast::BroadcastSink;
use tasksync_server::config::Config;
use tasksync_server::routes::start_server;
use tasksync_server::sync::SyncOrchestrator;
use tasksync_server::watcher::WatchRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Server failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    info!(
        port = config.port,
        enabled = config.sync.enabled,
        max_repositories = config.sync.max_repositories,
        repositories = config.repositories.len(),
        "TaskSync server starting"
    );

    let sink = BroadcastSink::new();
    let registry = WatchRegistry::new(config.sync.debounce);
    let orchestrator = SyncOrchestrator::new(config.sync.clone(), registry, sink.clone());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(port = config.port, address = %bind_addr, "Server listening");

    start_server(listener, &orchestrator, &sink, &config.repositories).await;
    info!("Server ready to accept connections");

    shutdown_signal().await;

    info!("Server shutting down gracefully");
    orchestrator.shutdown().await;
    sink.close().await;

    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT (Ctrl+C) is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
