//! Milo Server - standalone headless process hosting the Milo audio
//! orchestrator's HTTP/WebSocket boundary.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use milo_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Milo Server - multi-source audio orchestrator.
#[derive(Parser, Debug)]
#[command(name = "milo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MILO_LOG_LEVEL")]
    log_level: String,

    /// Bind port (overrides config file), 0 for auto-discovery.
    #[arg(short = 'p', long, env = "MILO_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for persistent state.
    #[arg(short = 'd', long, env = "MILO_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting milo-server");

    let mut config = ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let services = bootstrap_services(config.to_core_config())
        .await
        .context("failed to bootstrap services")?;

    tracing::info!("services bootstrapped");

    let app_state = AppState::builder().from_services(&services).build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            tracing::error!(error = %e, "server error");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    server_handle.abort();

    tracing::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
