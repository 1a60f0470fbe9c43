//! Terminal sessions over WebSocket
//!
//! `/ws/terminal` attaches a browser to an interactive shell; `/ws/deploy`
//! runs the install or update script in a PTY so its output streams the
//! same way.

mod bridge;
mod process;

pub use bridge::{run_bridge, BridgeState};
pub use process::{process_exists, PtyIo, PtyProcess, TerminalSpec};

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::state::AgentState;

/// Query string of `/ws/deploy`
#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    /// `install` selects the install script, anything else the update script
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /ws/terminal`
pub async fn terminal_handler(
    State(state): State<Arc<AgentState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let spec = TerminalSpec::shell(&state.config);
    let session = state.next_session_id();
    ws.on_upgrade(move |socket| run_bridge(socket, spec, session))
}

/// `GET /ws/deploy?type=install|update`
pub async fn deploy_handler(
    State(state): State<Arc<AgentState>>,
    Query(query): Query<DeployQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let script = state.config.script_for(query.kind.as_deref());
    let spec = TerminalSpec::script(&state.config, script);
    let session = state.next_session_id();
    ws.on_upgrade(move |socket| run_bridge(socket, spec, session))
}
