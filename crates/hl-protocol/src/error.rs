//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding control frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not a JSON control message
    #[error("Malformed control frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Resize carried a zero dimension
    #[error("Invalid terminal size: {cols}x{rows}")]
    InvalidSize { cols: u16, rows: u16 },
}
