//! Duplex byte relay
//!
//! [`relay`] couples two byte streams: everything read from one side is
//! written to the other, in both directions at once. The relay ends as
//! soon as either direction sees EOF or an error. At that point both
//! write halves are shut down and both streams are dropped, so neither
//! side is usable afterwards. Errors are reported, never retried.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Which copy loop ended the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reading `a`, writing `b`
    AToB,
    /// Reading `b`, writing `a`
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "a->b"),
            Direction::BToA => write!(f, "b->a"),
        }
    }
}

/// How a relay ended
#[derive(Debug)]
pub struct RelaySummary {
    /// The direction that finished first
    pub finished: Direction,
    /// Bytes that direction copied before finishing
    pub bytes: u64,
    /// Set when the direction ended on an error rather than EOF
    pub error: Option<io::Error>,
}

impl RelaySummary {
    /// True when the relay ended on a clean EOF
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Copy between `a` and `b` until either direction ends, then close both
pub async fn relay<A, B>(a: A, b: B) -> RelaySummary
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let (finished, result) = tokio::select! {
        result = tokio::io::copy(&mut a_read, &mut b_write) => (Direction::AToB, result),
        result = tokio::io::copy(&mut b_read, &mut a_write) => (Direction::BToA, result),
    };

    // The losing copy loop was dropped above; close both sides so the peers see EOF
    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    match result {
        Ok(bytes) => RelaySummary {
            finished,
            bytes,
            error: None,
        },
        Err(e) => RelaySummary {
            finished,
            bytes: 0,
            error: Some(e),
        },
    }
}
