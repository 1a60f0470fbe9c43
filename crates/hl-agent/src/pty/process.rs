//! PTY-backed child processes
//!
//! The child is started as a session leader on a fresh PTY, so killing its
//! process group (and, on Linux, anything else still in its session) takes
//! down background jobs it started as well.

use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use hl_core::config::AgentConfig;
use hl_core::error::SessionError;
use hl_protocol::TerminalSize;

/// What to run inside a new PTY
#[derive(Debug, Clone)]
pub struct TerminalSpec {
    /// Program to execute
    pub program: String,
    /// Arguments after the program
    pub args: Vec<String>,
    /// Extra environment
    pub env: Vec<(String, String)>,
    /// Working directory, inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Initial window size
    pub size: TerminalSize,
}

impl TerminalSpec {
    /// The configured interactive shell
    pub fn shell(config: &AgentConfig) -> Self {
        Self {
            program: config.shell.clone(),
            args: vec![],
            env: config.default_env.clone(),
            cwd: None,
            size: TerminalSize::default(),
        }
    }

    /// Run `script` with the configured shell, from the script directory
    pub fn script(config: &AgentConfig, script: PathBuf) -> Self {
        let cwd = config.script_dir.is_dir().then(|| config.script_dir.clone());
        Self {
            program: config.shell.clone(),
            args: vec![script.to_string_lossy().into_owned()],
            env: config.default_env.clone(),
            cwd,
            size: TerminalSize::default(),
        }
    }
}

/// Blocking I/O handles on the PTY master
pub struct PtyIo {
    /// Child output
    pub reader: Box<dyn Read + Send>,
    /// Child input
    pub writer: Box<dyn Write + Send>,
}

/// A child process attached to a PTY
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn portable_pty::Child + Send + Sync>>,
    pid: Option<u32>,
    killed: bool,
}

impl PtyProcess {
    /// Open a PTY and start `spec` on it
    pub fn spawn(spec: &TerminalSpec) -> Result<(Self, PtyIo), SessionError> {
        let pair = native_pty_system()
            .openpty(pty_size(spec.size))
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(format!("{}: {}", spec.program, e)))?;
        // The child holds its own copy of the slave; ours would keep reads from ever hitting EOF
        drop(pair.slave);

        let pid = child.process_id();
        tracing::info!("Spawned {} in PTY with PID {:?}", spec.program, pid);

        let mut process = Self {
            master: pair.master,
            child: Some(child),
            pid,
            killed: false,
        };

        let io = match process.open_io() {
            Ok(io) => io,
            Err(e) => {
                process.kill_tree();
                return Err(e);
            }
        };

        Ok((process, io))
    }

    fn open_io(&self) -> Result<PtyIo, SessionError> {
        let reader = self
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyAllocation(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = self
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyAllocation(format!("Failed to take PTY writer: {}", e)))?;
        Ok(PtyIo { reader, writer })
    }

    /// Process ID of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Apply a new window size
    pub fn resize(&self, size: TerminalSize) -> Result<(), SessionError> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| SessionError::PtyAllocation(format!("Failed to resize PTY: {}", e)))
    }

    /// Kill the child and everything in its session. Safe to call twice.
    pub fn kill_tree(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_session(pid);
        }

        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
        }
    }

    /// Kill the tree and reap the child, returning its exit code
    pub async fn shutdown(mut self) -> Option<u32> {
        self.kill_tree();

        let mut child = self.child.take()?;
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => Some(status.exit_code()),
            Ok(Err(e)) => {
                tracing::debug!("Failed to reap PTY child {:?}: {}", self.pid, e);
                None
            }
            Err(e) => {
                tracing::debug!("Reaper task for {:?} failed: {}", self.pid, e);
                None
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill_tree();
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// SIGKILL the process group led by `pid` and any stragglers in its session
#[cfg(unix)]
fn kill_session(pid: u32) {
    let pid = pid as libc::pid_t;

    unsafe {
        if libc::killpg(pid, libc::SIGKILL) != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::debug!("killpg({}) failed: {}", pid, err);
            }
        }
    }

    // Jobs moved into their own process group are still in the session
    #[cfg(target_os = "linux")]
    for member in session_members(pid) {
        unsafe {
            libc::kill(member, libc::SIGKILL);
        }
    }
}

/// Processes whose session id is `sid`
#[cfg(target_os = "linux")]
fn session_members(sid: libc::pid_t) -> Vec<libc::pid_t> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return vec![];
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<libc::pid_t>().ok())
        .filter(|&pid| pid != sid && unsafe { libc::getsid(pid) } == sid)
        .collect()
}

/// Whether a process with this PID exists
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// Whether a process with this PID exists
#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}
