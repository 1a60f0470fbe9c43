//! HTTP surface of the agent

use std::future::Future;
use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;

use crate::state::AgentState;
use crate::{logs, proxy, pty};

/// Build the agent's router
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/ws/terminal", get(pty::terminal_handler))
        .route("/ws/deploy", get(pty::deploy_handler))
        .route("/ws/log", get(logs::follow_handler))
        .route("/api/log/download", get(logs::download_handler))
        .route("/api/proxy/:name", any(proxy::mount_handler))
        .route("/api/proxy/:name/", any(proxy::proxy_handler))
        .route("/api/proxy/:name/*rest", any(proxy::proxy_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AgentState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Agent listening on {}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
