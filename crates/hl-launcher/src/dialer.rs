//! Dialing the remote agent through SSH

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Handle;

use hl_core::traits::{BoxedStream, Dialer};

use crate::ssh::ClientHandler;

/// Loopback address the agent is reached on from the remote side
const REMOTE_HOST: &str = "127.0.0.1";

/// Opens a `direct-tcpip` channel to a port on the remote loopback per dial
pub struct SshDialer {
    handle: Arc<Handle<ClientHandler>>,
    remote_port: u16,
}

impl SshDialer {
    /// Dial `127.0.0.1:remote_port` on the far side of `handle`
    pub fn new(handle: Arc<Handle<ClientHandler>>, remote_port: u16) -> Self {
        Self {
            handle,
            remote_port,
        }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(REMOTE_HOST, self.remote_port as u32, REMOTE_HOST, 0)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))?;

        Ok(Box::new(channel.into_stream()))
    }

    fn target(&self) -> String {
        format!("ssh://{}:{}", REMOTE_HOST, self.remote_port)
    }
}
