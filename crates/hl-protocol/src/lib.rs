//! hl-protocol: Control protocol for hostlink browser sessions
//!
//! This crate defines the small JSON protocol a browser speaks to a
//! terminal session on the agent, and the text decoding applied to
//! everything the agent pushes back over a WebSocket.

pub mod error;
pub mod message;
pub mod text;

pub use error::ProtocolError;
pub use message::{ControlMessage, TerminalSize};
pub use text::Utf8Decoder;
