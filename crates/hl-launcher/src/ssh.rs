//! Password-authenticated SSH transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

use hl_core::error::ConnectionError;

/// SSH client handler for the launcher
pub struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Managed hosts are reached by address and password; any host key is accepted
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
    /// Exit status, if the server reported one
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// An authenticated SSH connection shared by every channel opened on it
#[derive(Clone)]
pub struct SshSession {
    handle: Arc<Handle<ClientHandler>>,
    address: String,
}

impl SshSession {
    /// Connect to `host:port` and authenticate with a password.
    ///
    /// TCP connect plus handshake are bounded by `connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let address = format!("{}:{}", host, port);
        let config = Arc::new(Config::default());

        tracing::debug!("Connecting to {}", address);
        let mut handle = tokio::time::timeout(
            connect_timeout,
            client::connect(config, address.as_str(), ClientHandler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout {
            address: address.clone(),
            timeout: connect_timeout,
        })?
        .map_err(|e| ConnectionError::Unreachable {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Authenticating as user '{}'", user);
        let authenticated = handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| ConnectionError::Transport(format!("Authentication error: {}", e)))?;

        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed {
                user: user.to_string(),
            });
        }

        tracing::info!("Connected to {} as {}", address, user);
        Ok(Self {
            handle: Arc::new(handle),
            address,
        })
    }

    /// `host:port` this session is connected to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The underlying russh handle
    pub fn handle(&self) -> Arc<Handle<ClientHandler>> {
        Arc::clone(&self.handle)
    }

    /// Run `command` on a fresh session channel and collect its output
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, ConnectionError> {
        tracing::debug!("exec: {}", command);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::Transport(format!("Failed to open session channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ConnectionError::Transport(format!("Failed to exec: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    /// Close the transport
    pub async fn disconnect(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.address, e);
        }
    }
}
