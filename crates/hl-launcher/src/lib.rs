//! hl-launcher: Deploys the hostlink agent and tunnels it locally
//!
//! The launcher connects to a host over SSH with a password, detects its
//! architecture, replaces any previous agent with a freshly uploaded one,
//! starts it detached and exposes its port on the local machine through a
//! [`hl_core::tunnel::TunnelForwarder`] whose connections ride SSH
//! `direct-tcpip` channels.

pub mod bootstrap;
pub mod dialer;
pub mod output;
pub mod ssh;
pub mod upload;

pub use bootstrap::{DeployObserver, DeploySession, DeployStep};
