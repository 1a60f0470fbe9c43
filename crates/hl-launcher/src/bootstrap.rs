//! Remote agent bootstrap
//!
//! [`DeploySession::deploy`] takes a host from nothing to a running agent
//! reachable on a local port:
//!
//! 1. connect and authenticate (bounded by the connect timeout)
//! 2. probe the architecture with `uname -m`
//! 3. kill any previous agent and remove its binary, ignoring failures
//! 4. upload the matching binary over SFTP
//! 5. start it detached with output redirected to the remote log
//! 6. open a local tunnel to the agent's port over the same connection
//!
//! Nothing is retried; the caller decides whether to deploy again.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use hl_core::config::{AgentBinaries, LauncherConfig};
use hl_core::error::DeployError;
use hl_core::tunnel::TunnelForwarder;
use hl_core::Arch;

use crate::dialer::SshDialer;
use crate::ssh::SshSession;
use crate::upload::upload_file;

/// Deploy progress, reported before each step starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    /// Connecting and authenticating
    Connecting,
    /// Running the architecture probe
    DetectingArch,
    /// Removing a previous agent
    Cleaning,
    /// Uploading the agent binary
    Uploading,
    /// Starting the agent
    Starting,
    /// Opening the local tunnel
    Tunneling,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeployStep::Connecting => "Connecting",
            DeployStep::DetectingArch => "Detecting architecture",
            DeployStep::Cleaning => "Cleaning up previous agent",
            DeployStep::Uploading => "Uploading agent",
            DeployStep::Starting => "Starting agent",
            DeployStep::Tunneling => "Opening tunnel",
        };
        f.write_str(text)
    }
}

/// Receives deploy progress
pub trait DeployObserver: Send + Sync {
    /// Called as each step begins
    fn on_step(&self, step: DeployStep);
}

impl<F> DeployObserver for F
where
    F: Fn(DeployStep) + Send + Sync,
{
    fn on_step(&self, step: DeployStep) {
        self(step)
    }
}

/// A running remote agent and the local tunnel to it
pub struct DeploySession {
    host: String,
    arch: Arch,
    ssh: SshSession,
    tunnel: Option<TunnelForwarder>,
    config: LauncherConfig,
}

impl DeploySession {
    /// Deploy the agent to `host` and tunnel `config.local_port` to its
    /// `config.remote_port`.
    pub async fn deploy(
        config: &LauncherConfig,
        host: &str,
        password: &str,
        observer: &dyn DeployObserver,
    ) -> Result<Self, DeployError> {
        preflight(&config.binaries)?;

        observer.on_step(DeployStep::Connecting);
        let ssh = SshSession::connect(
            host,
            config.ssh_port,
            &config.username,
            password,
            config.connect_timeout,
        )
        .await?;

        match bring_up(&ssh, config, observer).await {
            Ok((arch, tunnel)) => Ok(Self {
                host: host.to_string(),
                arch,
                ssh,
                tunnel: Some(tunnel),
                config: config.clone(),
            }),
            Err(e) => {
                ssh.disconnect().await;
                Err(e)
            }
        }
    }

    /// Host the agent was deployed to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Detected remote architecture
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Address the tunnel is listening on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tunnel.as_ref().map(TunnelForwarder::local_addr)
    }

    /// URL a browser uses to reach the agent
    pub fn local_url(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("http://localhost:{}", addr.port()),
            None => self.config.local_url(),
        }
    }

    /// Tunnel connections currently relaying
    pub fn active_connections(&self) -> usize {
        self.tunnel
            .as_ref()
            .map(TunnelForwarder::active_connections)
            .unwrap_or(0)
    }

    /// Kill the remote agent, close the SSH connection and the local listener.
    ///
    /// Every step is best effort.
    pub async fn stop(mut self) {
        tracing::info!("Stopping agent on {}", self.host);

        match self.ssh.exec(&kill_command(&self.config.agent_name)).await {
            Ok(output) => tracing::debug!("Remote kill exited with {:?}", output.exit_status),
            Err(e) => tracing::warn!("Failed to stop remote agent: {}", e),
        }

        self.ssh.disconnect().await;

        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }
}

async fn bring_up(
    ssh: &SshSession,
    config: &LauncherConfig,
    observer: &dyn DeployObserver,
) -> Result<(Arch, TunnelForwarder), DeployError> {
    observer.on_step(DeployStep::DetectingArch);
    let arch = detect_arch(ssh).await?;
    tracing::info!("Remote architecture: {}", arch);

    observer.on_step(DeployStep::Cleaning);
    cleanup(ssh, config).await;
    tokio::time::sleep(config.cleanup_delay).await;

    observer.on_step(DeployStep::Uploading);
    let binary = config.binaries.for_arch(arch);
    upload_file(ssh, binary, &config.remote_install_path).await?;

    observer.on_step(DeployStep::Starting);
    start_agent(ssh, config).await?;
    tokio::time::sleep(config.start_delay).await;

    observer.on_step(DeployStep::Tunneling);
    let dialer = Arc::new(SshDialer::new(ssh.handle(), config.remote_port));
    let tunnel = TunnelForwarder::open(&config.local_address(), dialer).await?;

    Ok((arch, tunnel))
}

/// Every per-architecture binary must exist before anything touches the host
pub fn preflight(binaries: &AgentBinaries) -> Result<(), DeployError> {
    for path in binaries.all() {
        if !path.is_file() {
            return Err(DeployError::MissingBinary(path.to_path_buf()));
        }
    }
    Ok(())
}

async fn detect_arch(ssh: &SshSession) -> Result<Arch, DeployError> {
    let output = ssh
        .exec(PROBE_COMMAND)
        .await
        .map_err(|e| DeployError::ProbeFailed(e.to_string()))?;

    if !output.success() {
        return Err(DeployError::ProbeFailed(format!(
            "exit status {:?}: {}",
            output.exit_status,
            output.stderr.trim()
        )));
    }

    Arch::from_uname(&output.stdout)
}

/// Kill and remove a previous agent. Failures are expected on a fresh host.
async fn cleanup(ssh: &SshSession, config: &LauncherConfig) {
    // Run separately so the kill pattern never matches the shell running `rm`
    let commands = [
        kill_command(&config.agent_name),
        remove_command(&config.remote_install_path),
    ];

    for command in commands {
        match ssh.exec(&command).await {
            Ok(output) => tracing::debug!("`{}` exited with {:?}", command, output.exit_status),
            Err(e) => tracing::debug!("`{}` failed: {}", command, e),
        }
    }
}

async fn start_agent(ssh: &SshSession, config: &LauncherConfig) -> Result<(), DeployError> {
    let command = start_command(
        &config.remote_install_path,
        config.remote_port,
        &config.remote_log_path,
    );

    let output = ssh
        .exec(&command)
        .await
        .map_err(|e| DeployError::StartFailed(e.to_string()))?;

    if !output.success() {
        return Err(DeployError::StartFailed(format!(
            "exit status {:?}: {}",
            output.exit_status,
            output.stderr.trim()
        )));
    }

    tracing::info!(
        "Agent started on remote port {}, logging to {}",
        config.remote_port,
        config.remote_log_path
    );
    Ok(())
}

/// Architecture probe
pub const PROBE_COMMAND: &str = "uname -m";

/// `pkill -f` pattern for `name` that cannot match its own command line.
///
/// `hl-agent` becomes `[h]l-agent`, which matches the text `hl-agent` but
/// not itself.
pub fn kill_pattern(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("[{}]{}", first, chars.as_str()),
        None => String::new(),
    }
}

/// Kill every process whose command line mentions `name`
pub fn kill_command(name: &str) -> String {
    format!("pkill -f {}", shell_quote(&kill_pattern(name)))
}

/// Remove the installed binary
pub fn remove_command(path: &str) -> String {
    format!("rm -f {}", shell_quote(path))
}

/// Make the binary executable and start it detached from the SSH session
pub fn start_command(path: &str, port: u16, log_path: &str) -> String {
    let path = shell_quote(path);
    format!(
        "chmod 755 {path} && {{ nohup {path} --port {port} > {log} 2>&1 < /dev/null & }}",
        path = path,
        port = port,
        log = shell_quote(log_path),
    )
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
