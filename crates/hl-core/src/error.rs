//! Core error types for hostlink

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the hostlink ecosystem
#[derive(Error, Debug)]
pub enum HlError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Deploy error
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors establishing the authenticated SSH transport
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connect or SSH handshake failed
    #[error("Cannot reach {address}: {reason}")]
    Unreachable { address: String, reason: String },

    /// Connect did not complete in time
    #[error("Connection to {address} timed out after {}s", .timeout.as_secs())]
    Timeout { address: String, timeout: Duration },

    /// Server rejected the credentials
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Transport failed after it was established
    #[error("SSH transport error: {0}")]
    Transport(String),
}

/// Errors from a single deploy attempt
#[derive(Error, Debug)]
pub enum DeployError {
    /// Could not connect or authenticate
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Remote architecture is not one we ship a binary for
    #[error("Unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// Local agent binary for an architecture is absent
    #[error("Missing agent binary: {}", .0.display())]
    MissingBinary(PathBuf),

    /// Architecture probe command failed
    #[error("Architecture probe failed: {0}")]
    ProbeFailed(String),

    /// Upload of the agent binary failed
    #[error("Upload to {remote_path} failed: {reason}")]
    Transfer { remote_path: String, reason: String },

    /// Starting the remote agent failed
    #[error("Failed to start remote agent: {0}")]
    StartFailed(String),

    /// Local tunnel could not be opened
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// Errors opening a local tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Local address is already bound or not bindable
    #[error("Cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// PTY allocation failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// Child process could not be started
    #[error("Failed to start process: {0}")]
    Spawn(String),

    /// Requested log key is not in the table
    #[error("Unknown log key: {0}")]
    UnknownLogKey(String),

    /// Resolved log file does not exist
    #[error("Log file not found: {}", .0.display())]
    LogMissing(PathBuf),

    /// I/O error on the session
    #[error("Session I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
