//! hl-core: Core abstractions and configuration for hostlink
//!
//! This crate provides the configuration structures shared by the agent
//! and the launcher, the error taxonomy, and the connection-level relay
//! machinery: [`relay::relay`] couples two byte streams and
//! [`tunnel::TunnelForwarder`] exposes a remote target on a local port.

pub mod config;
pub mod error;
pub mod relay;
pub mod traits;
pub mod tunnel;
pub mod types;

pub use error::HlError;
pub use types::Arch;
