//! Local port forwarding
//!
//! A [`TunnelForwarder`] listens on a local TCP address and, for every
//! accepted connection, dials the remote target through a [`Dialer`] and
//! relays bytes between the two. Accepting happens on one task; every
//! connection runs on its own task, so a slow connection never holds up
//! the others.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::relay::relay;
use crate::traits::Dialer;

/// One accepted local socket paired with one dialed remote stream
#[derive(Debug, Clone)]
pub struct TunnelConnection {
    /// Sequence number within this forwarder
    pub id: u64,
    /// Local peer that connected
    pub peer: SocketAddr,
    /// When the local connection was accepted
    pub created_at: Instant,
}

/// Accepts local connections and relays each one to the remote target
pub struct TunnelForwarder {
    /// Bound local address
    local_addr: SocketAddr,
    /// Stops the accept loop
    cancel: CancellationToken,
    /// The accept loop
    accept_task: Option<JoinHandle<()>>,
    /// Connections currently relaying
    active: Arc<AtomicUsize>,
}

impl TunnelForwarder {
    /// Bind `bind_addr` and start forwarding to `dialer`'s target.
    ///
    /// Returns as soon as the listener is bound; fails if the address is
    /// already in use.
    pub async fn open(bind_addr: &str, dialer: Arc<dyn Dialer>) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| TunnelError::Bind {
                address: bind_addr.to_string(),
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| TunnelError::Bind {
            address: bind_addr.to_string(),
            source,
        })?;

        tracing::info!("Tunnel listening on {} -> {}", local_addr, dialer.target());

        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            dialer,
            cancel.clone(),
            Arc::clone(&active),
        ));

        Ok(Self {
            local_addr,
            cancel,
            accept_task: Some(accept_task),
            active,
        })
    }

    /// The address the forwarder is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently relaying
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Stop accepting. Connections already relaying drain on their own.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        tracing::info!("Tunnel on {} closed", self.local_addr);
    }
}

impl Drop for TunnelForwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    dialer: Arc<dyn Dialer>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Tunnel accept loop stopping");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((socket, peer)) => {
                        let conn = TunnelConnection {
                            id: next_id.fetch_add(1, Ordering::Relaxed),
                            peer,
                            created_at: Instant::now(),
                        };
                        tokio::spawn(forward_connection(
                            conn,
                            socket,
                            Arc::clone(&dialer),
                            Arc::clone(&active),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept tunnel connection: {}", e);
                    }
                }
            }
        }
    }
}

async fn forward_connection(
    conn: TunnelConnection,
    socket: TcpStream,
    dialer: Arc<dyn Dialer>,
    active: Arc<AtomicUsize>,
) {
    let _ = socket.set_nodelay(true);

    let remote = match dialer.dial().await {
        Ok(remote) => remote,
        Err(e) => {
            // Dropping the socket closes the local side; other connections are unaffected
            tracing::warn!(
                conn = conn.id,
                peer = %conn.peer,
                "Dial to {} failed: {}",
                dialer.target(),
                e
            );
            return;
        }
    };

    active.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(conn = conn.id, peer = %conn.peer, "Tunnel connection open");

    let summary = relay(socket, remote).await;

    active.fetch_sub(1, Ordering::Relaxed);
    match summary.error {
        None => tracing::debug!(
            conn = conn.id,
            peer = %conn.peer,
            "Tunnel connection closed ({} finished after {} bytes, {:?})",
            summary.finished,
            summary.bytes,
            conn.created_at.elapsed()
        ),
        Some(e) => tracing::debug!(
            conn = conn.id,
            peer = %conn.peer,
            "Tunnel connection ended with error on {}: {}",
            summary.finished,
            e
        ),
    }
}
