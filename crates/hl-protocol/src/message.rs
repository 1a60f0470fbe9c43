//! Control messages for terminal sessions
//!
//! A browser attached to a terminal session sends JSON text frames of the
//! following shapes:
//!
//! ```json
//! {"type":"input","data":"ls -la\r"}
//! {"type":"resize","cols":100,"rows":40}
//! ```
//!
//! Any other `type` decodes to [`ControlMessage::Unrecognized`], which a
//! session must treat as a no-op. Output travels the other way as plain
//! text frames with no envelope.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }

    /// A size with a zero dimension cannot be applied to a PTY
    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// Inbound control frame from a terminal client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Raw keystrokes to write to the PTY master
    Input {
        /// Input as text; written verbatim as UTF-8 bytes
        data: String,
    },

    /// New window size for the PTY
    Resize {
        /// Number of columns
        cols: u16,
        /// Number of rows
        rows: u16,
    },

    /// Any tag this side does not know; ignored by contract
    #[serde(other)]
    Unrecognized,
}

impl ControlMessage {
    /// Decode a text frame
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let message: ControlMessage = serde_json::from_str(frame)?;

        if let ControlMessage::Resize { cols, rows } = message {
            if !TerminalSize::new(rows, cols).is_valid() {
                return Err(ProtocolError::InvalidSize { cols, rows });
            }
        }

        Ok(message)
    }

    /// Build an input message
    pub fn input(data: impl Into<String>) -> Self {
        Self::Input { data: data.into() }
    }

    /// Build a resize message
    pub fn resize(size: TerminalSize) -> Self {
        Self::Resize {
            cols: size.cols,
            rows: size.rows,
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> String {
        // Serializing a plain tagged enum into a String cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
