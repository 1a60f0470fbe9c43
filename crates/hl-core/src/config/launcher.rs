//! Launcher configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::types::Arch;

/// Configuration for the deploy launcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// SSH port on the target host
    pub ssh_port: u16,

    /// SSH user
    pub username: String,

    /// Bound on TCP connect plus SSH handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Local port the tunnel listens on
    pub local_port: u16,

    /// Port the remote agent listens on
    pub remote_port: u16,

    /// Prebuilt agent binaries, one per supported architecture
    pub binaries: AgentBinaries,

    /// Where the agent binary is installed on the remote host
    pub remote_install_path: String,

    /// Where the remote agent's stdout/stderr accumulate
    pub remote_log_path: String,

    /// Process name used to find and kill previous instances
    pub agent_name: String,

    /// Pause after killing a previous instance
    #[serde(with = "duration_millis")]
    pub cleanup_delay: Duration,

    /// Pause after starting the agent before opening the tunnel
    #[serde(with = "duration_millis")]
    pub start_delay: Duration,

    /// Open a browser on the tunnel URL once deployed
    pub open_browser: bool,
}

/// Local agent binaries by architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBinaries {
    /// x86_64 build
    pub amd64: PathBuf,
    /// aarch64 build
    pub arm64: PathBuf,
}

impl AgentBinaries {
    /// Binary for a detected architecture
    pub fn for_arch(&self, arch: Arch) -> &Path {
        match arch {
            Arch::Amd64 => self.amd64.as_path(),
            Arch::Arm64 => self.arm64.as_path(),
        }
    }

    /// Every configured binary, in a stable order
    pub fn all(&self) -> [&Path; 2] {
        [self.amd64.as_path(), self.arm64.as_path()]
    }
}

impl Default for AgentBinaries {
    fn default() -> Self {
        Self {
            amd64: PathBuf::from("hl-agent_amd64"),
            arm64: PathBuf::from("hl-agent_arm64"),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            ssh_port: 22,
            username: "root".to_string(),
            connect_timeout: Duration::from_secs(5),
            local_port: 9999,
            remote_port: 9898,
            binaries: AgentBinaries::default(),
            remote_install_path: "/root/hl-agent".to_string(),
            remote_log_path: "/root/hl-agent.log".to_string(),
            agent_name: "hl-agent".to_string(),
            cleanup_delay: Duration::from_millis(500),
            start_delay: Duration::from_secs(1),
            open_browser: false,
        }
    }
}

impl LauncherConfig {
    /// Local address the tunnel binds to
    pub fn local_address(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }

    /// URL a browser uses to reach the agent through the tunnel
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}
