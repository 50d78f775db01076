//! Fleetdeck control-plane daemon
//!
//! Serves the localhost IPC interface, keeps target sync loops running
//! and dispatches alerts until it is signalled to stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fd_control::ipc::IpcServer;
use fd_control::ControlState;
use fd_core::config::{self, ControlConfig};

#[derive(Parser)]
#[command(name = "fd-control")]
#[command(about = "Fleetdeck control-plane daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FLEETDECK_CONFIG")]
    config: Option<PathBuf>,

    /// IPC bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for persisted state (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Fleetdeck control plane starting...");

    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ControlConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ControlConfig::default()
        }
    };

    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    let ipc_address = args.bind.unwrap_or_else(|| config.ipc_address());

    let state = Arc::new(
        ControlState::open(config)
            .context("Failed to open control-plane state")?,
    );
    tracing::info!(
        "Loaded {} targets, journal at {:?}",
        state.registry.len(),
        state.config.journal_path()
    );

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    state.sync.start_all();

    let alerts = tokio::spawn(
        Arc::clone(&state.alerts).run(state.events.subscribe(), cancel.clone()),
    );

    let server = IpcServer::new(ipc_address, Arc::clone(&state)).with_shutdown_token(cancel.clone());
    let served = server.run().await;

    // The server can also fail to bind; stop everything either way
    cancel.cancel();
    state.shutdown().await;
    if let Err(e) = alerts.await {
        tracing::error!("Alert dispatcher panicked: {}", e);
    }

    served?;
    tracing::info!("Control plane shutdown complete");
    Ok(())
}
