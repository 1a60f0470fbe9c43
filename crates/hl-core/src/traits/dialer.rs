//! Dialer traits
//!
//! A [`Dialer`] opens one fresh duplex byte stream to a fixed target each
//! time it is called. The tunnel forwarder holds one dialer and calls it
//! once per accepted local connection; implementations must be cheap to
//! share, since every connection dials concurrently.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any async byte stream that can be moved between tasks
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Type-erased duplex stream returned by a dialer
pub type BoxedStream = Box<dyn DuplexStream>;

/// Factory for streams to a remote target
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a new, independent stream to the target
    async fn dial(&self) -> io::Result<BoxedStream>;

    /// Human-readable description of the target, for logs
    fn target(&self) -> String;
}

/// Dials a plain TCP address
#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    /// Create a dialer for `host:port`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn target(&self) -> String {
        self.address.clone()
    }
}
