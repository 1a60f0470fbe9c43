//! Agent state management

use std::sync::atomic::{AtomicU64, Ordering};

use hl_core::config::AgentConfig;

use crate::logs::LogTable;

/// Shared state for the agent's HTTP handlers
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Log keys resolved at startup
    pub logs: LogTable,
    /// Client for proxied upstream requests
    pub http: reqwest::Client,
    /// Counter for session ids in logs
    next_session: AtomicU64,
}

impl AgentState {
    /// Create new agent state
    pub fn new(config: AgentConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            logs: LogTable::from_config(&config),
            config,
            http,
            next_session: AtomicU64::new(1),
        })
    }

    /// Allocate an id for a new WebSocket session
    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}
