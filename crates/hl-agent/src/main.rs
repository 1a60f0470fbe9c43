//! hostlink Agent Daemon
//!
//! Runs on the managed host and serves terminal, log and proxy sessions
//! to browsers reaching it through the launcher's tunnel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hl_agent::AgentState;
use hl_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "hl-agent")]
#[command(about = "hostlink agent - serves terminal, log and proxy sessions")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hostlink agent starting...");

    // Load configuration; an explicitly named file must be valid
    let mut config: AgentConfig = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => config::load_or_default(&config::default_agent_config_path()),
    };

    // Apply command-line overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_host = bind;
    }

    // A second agent on the same port would race the first; refuse to start
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {} (is another agent already running?)", address))?;

    let state = Arc::new(AgentState::new(config).context("Failed to create HTTP client")?);

    hl_agent::serve(listener, state, shutdown_signal())
        .await
        .context("Agent server failed")?;

    tracing::info!("hostlink agent stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
