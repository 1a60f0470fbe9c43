//! hl-agent: Remote agent for hostlink
//!
//! The agent runs on the managed host and serves browser sessions over
//! HTTP: interactive and script terminals bridged to PTYs, live log
//! follow, and a rewriting reverse proxy for local admin consoles.

pub mod logs;
pub mod proxy;
pub mod pty;
pub mod server;
pub mod state;

pub use server::{router, serve};
pub use state::AgentState;
