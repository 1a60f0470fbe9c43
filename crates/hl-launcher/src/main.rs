//! hostlink launcher
//!
//! Deploys the agent to a host over SSH, tunnels it to a local port and
//! keeps the tunnel up until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hl_core::config::{self, LauncherConfig};
use hl_launcher::output::{print_error, print_info, print_success, print_warning};
use hl_launcher::{DeploySession, DeployStep};

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(author, version, about = "Deploy the hostlink agent over SSH and reach it locally")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the agent to a host and tunnel it to a local port
    Deploy {
        /// Host to deploy to
        host: String,
        /// SSH port (overrides config)
        #[arg(long)]
        ssh_port: Option<u16>,
        /// SSH user (overrides config)
        #[arg(short, long)]
        user: Option<String>,
        /// SSH password
        #[arg(long, env = "HOSTLINK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Local port for the tunnel (overrides config)
        #[arg(long)]
        local_port: Option<u16>,
        /// Port the agent listens on remotely (overrides config)
        #[arg(long)]
        remote_port: Option<u16>,
        /// Open a browser once the tunnel is up
        #[arg(long)]
        open: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_launcher_config_path);

    match cli.command {
        Commands::Deploy {
            host,
            ssh_port,
            user,
            password,
            local_port,
            remote_port,
            open,
        } => {
            let mut config = load_launcher_config(cli.config.as_ref())?;

            // Apply command-line overrides
            if let Some(port) = ssh_port {
                config.ssh_port = port;
            }
            if let Some(user) = user {
                config.username = user;
            }
            if let Some(port) = local_port {
                config.local_port = port;
            }
            if let Some(port) = remote_port {
                config.remote_port = port;
            }
            config.open_browser |= open;

            let password = password
                .context("No password given; pass --password or set HOSTLINK_PASSWORD")?;

            run_deploy(&config, &host, &password).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_launcher_config(cli.config.as_ref())?;
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}

/// An explicitly named config file must load; the default one may be absent
fn load_launcher_config(path: Option<&PathBuf>) -> Result<LauncherConfig> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(config::load_or_default(&config::default_launcher_config_path())),
    }
}

async fn run_deploy(config: &LauncherConfig, host: &str, password: &str) -> Result<()> {
    let observer = |step: DeployStep| print_info(&format!("{}...", step));

    let session = match DeploySession::deploy(config, host, password, &observer).await {
        Ok(session) => session,
        Err(e) => {
            print_error(&format!("Deploy to {} failed: {}", host, e));
            return Err(e.into());
        }
    };

    print_success(&format!(
        "Agent running on {} ({})",
        session.host(),
        session.arch()
    ));
    let url = session.local_url();
    print_success(&format!("Reachable at {}", url));

    if config.open_browser {
        open_browser(&url);
    }

    print_info("Press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        print_warning(&format!("Failed to wait for Ctrl-C: {}", e));
    }

    print_info("Stopping...");
    session.stop().await;
    print_success("Stopped");
    Ok(())
}

fn open_browser(url: &str) {
    let result = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).spawn()
    } else if cfg!(windows) {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
    } else {
        std::process::Command::new("xdg-open").arg(url).spawn()
    };

    if let Err(e) = result {
        print_warning(&format!("Could not open a browser: {}", e));
    }
}
