//! Log follow and download
//!
//! `/ws/log?key=` streams a fixed table of log files with
//! `tail -f -n <lines>`; `/api/log/download?key=` serves the whole file.
//! Keys not in the table are rejected, so clients never name a path.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use hl_core::config::AgentConfig;
use hl_core::error::SessionError;
use hl_protocol::Utf8Decoder;

use crate::state::AgentState;

/// Read size for tail output
const READ_CHUNK: usize = 8192;

/// Read-only map of log key to file path
#[derive(Debug, Clone)]
pub struct LogTable {
    paths: BTreeMap<String, PathBuf>,
}

impl LogTable {
    /// Resolve primary/fallback locations once
    pub fn from_config(config: &AgentConfig) -> Self {
        let paths = config.resolve_logs();
        for (key, path) in &paths {
            tracing::debug!("Log '{}' -> {}", key, path.display());
        }
        Self { paths }
    }

    /// Build a table from explicit paths
    pub fn from_paths(paths: BTreeMap<String, PathBuf>) -> Self {
        Self { paths }
    }

    /// Path for `key`, which must be known and exist
    pub fn lookup(&self, key: &str) -> Result<&Path, SessionError> {
        let path = self
            .paths
            .get(key)
            .ok_or_else(|| SessionError::UnknownLogKey(key.to_string()))?;

        if !path.is_file() {
            return Err(SessionError::LogMissing(path.clone()));
        }
        Ok(path)
    }

    /// Known keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }
}

/// Query string of the log endpoints
#[derive(Debug, Deserialize)]
pub struct LogQuery {
    /// Log table key
    #[serde(default)]
    pub key: String,
}

/// `GET /ws/log?key=`
pub async fn follow_handler(
    State(state): State<Arc<AgentState>>,
    Query(query): Query<LogQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session = state.next_session_id();
    ws.on_upgrade(move |socket| follow_log(socket, state, query.key, session))
}

async fn follow_log(socket: WebSocket, state: Arc<AgentState>, key: String, session: u64) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let path = match state.logs.lookup(&key) {
        Ok(path) => path.to_path_buf(),
        Err(e) => {
            tracing::info!(session, "Rejecting log session: {}", e);
            let _ = ws_tx.send(Message::Text(format!("Error: {}", e))).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let mut child = match Command::new("tail")
        .arg("-f")
        .arg("-n")
        .arg(state.config.tail_lines.to_string())
        .arg(&path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(session, "Failed to start tail for {}: {}", path.display(), e);
            let _ = ws_tx
                .send(Message::Text(format!("Error: failed to follow {}: {}", key, e)))
                .await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::info!(session, "Following log '{}' at {}", key, path.display());

    if let Some(stdout) = child.stdout.take() {
        // Push-only: inbound frames only matter as a disconnect signal
        let disconnected = async {
            loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        };
        stream_text(stdout, &mut ws_tx, disconnected, session).await;
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(session, "Failed to stop tail: {}", e);
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
    tracing::info!(session, "Log session '{}' closed", key);
}

/// Forward `reader` as text frames until it ends, the sink fails or `stop` resolves.
/// Whatever the decoder still holds is sent last.
async fn stream_text<R, S, F>(mut reader: R, tx: &mut S, stop: F, session: u64)
where
    R: AsyncRead + Unpin,
    S: Sink<Message> + Unpin,
    F: Future<Output = ()>,
{
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    tokio::pin!(stop);

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(session, "tail read failed: {}", e);
                        break;
                    }
                };
                let text = decoder.push(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if tx.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }

            _ = &mut stop => break,
        }
    }

    if let Some(rest) = decoder.finish() {
        let _ = tx.send(Message::Text(rest)).await;
    }
}

/// `GET /api/log/download?key=`
pub async fn download_handler(
    State(state): State<Arc<AgentState>>,
    Query(query): Query<LogQuery>,
) -> Response {
    let path = match state.logs.lookup(&query.key) {
        Ok(path) => path.to_path_buf(),
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Failed to open {} for download: {}", path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.log", query.key));

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
