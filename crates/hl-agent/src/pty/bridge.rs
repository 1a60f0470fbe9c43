//! WebSocket <-> PTY bridge
//!
//! Output is read on a blocking thread and forwarded as text frames; input
//! frames are JSON control messages. Whichever side ends first, the child
//! tree is killed, both pumps stop and the socket is closed.

use std::io::{Read, Write};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hl_protocol::{ControlMessage, TerminalSize, Utf8Decoder};

use super::process::{PtyProcess, TerminalSpec};

/// How long teardown waits for each blocking pump
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Spawning the child
    Opening,
    /// Relaying in both directions
    Running,
    /// Tearing down
    Closing,
    /// Child reaped and socket closed
    Closed,
}

/// Why the relay loop stopped
#[derive(Debug)]
enum EndReason {
    PtyClosed,
    ClientClosed,
    ClientError(String),
    InputClosed,
}

struct Bridge {
    session: u64,
    state: BridgeState,
    size: TerminalSize,
}

impl Bridge {
    fn transition(&mut self, next: BridgeState) {
        tracing::debug!(session = self.session, "Bridge {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Run one terminal session to completion on an upgraded socket
pub async fn run_bridge(socket: WebSocket, spec: TerminalSpec, session: u64) {
    let mut bridge = Bridge {
        session,
        state: BridgeState::Opening,
        size: spec.size,
    };
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (mut process, io) = match PtyProcess::spawn(&spec) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(session, "Terminal session failed to open: {}", e);
            let _ = ws_tx.send(Message::Text(format!("Error: {}", e))).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            bridge.transition(BridgeState::Closed);
            return;
        }
    };
    bridge.transition(BridgeState::Running);

    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
    let reader_task = spawn_pty_reader(session, io.reader, output_tx);

    let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(64);
    let writer_task = spawn_pty_writer(session, io.writer, input_rx);

    let mut decoder = Utf8Decoder::new();

    let reason = loop {
        tokio::select! {
            output = output_rx.recv() => {
                let Some(bytes) = output else {
                    break EndReason::PtyClosed;
                };
                let text = decoder.push(&bytes);
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    break EndReason::ClientError(e.to_string());
                }
            }

            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break EndReason::ClientClosed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break EndReason::ClientError(e.to_string()),
                };

                match ControlMessage::parse(&text) {
                    Ok(ControlMessage::Input { data }) => {
                        if input_tx.send(data.into_bytes()).await.is_err() {
                            break EndReason::InputClosed;
                        }
                    }
                    Ok(ControlMessage::Resize { cols, rows }) => {
                        let size = TerminalSize::new(rows, cols);
                        match process.resize(size) {
                            Ok(()) => bridge.size = size,
                            Err(e) => tracing::warn!(session, "{}", e),
                        }
                    }
                    Ok(ControlMessage::Unrecognized) => {
                        tracing::trace!(session, "Ignoring unrecognized control message");
                    }
                    Err(e) => {
                        tracing::debug!(session, "Ignoring control frame: {}", e);
                    }
                }
            }
        }
    };

    bridge.transition(BridgeState::Closing);
    tracing::info!(
        session,
        "Terminal session ending ({:?}, last size {}x{})",
        reason,
        bridge.size.cols,
        bridge.size.rows
    );

    // Killing the tree first makes the blocking reader hit EOF
    process.kill_tree();
    drop(input_tx);
    drop(output_rx);

    let _ = tokio::time::timeout(PUMP_JOIN_TIMEOUT, reader_task).await;
    let _ = tokio::time::timeout(PUMP_JOIN_TIMEOUT, writer_task).await;
    let exit_code = process.shutdown().await;

    close_socket(&mut ws_tx, decoder.finish()).await;

    bridge.transition(BridgeState::Closed);
    tracing::info!(session, "Terminal session closed (exit code {:?})", exit_code);
}

async fn close_socket(ws_tx: &mut SplitSink<WebSocket, Message>, remainder: Option<String>) {
    if let Some(text) = remainder {
        let _ = ws_tx.send(Message::Text(text)).await;
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

/// Read PTY output on a blocking thread until EOF or the receiver goes away
fn spawn_pty_reader(
    session: u64,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(session, "PTY reader EOF");
                    break;
                }
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        tracing::debug!(session, "PTY output channel closed");
                        break;
                    }
                }
                Err(e) => {
                    // EIO once every slave fd is closed
                    tracing::debug!(session, "PTY reader closed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Write client input to the PTY on a blocking thread, in arrival order
fn spawn_pty_writer(
    session: u64,
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                tracing::debug!(session, "PTY write failed: {}", e);
                break;
            }
        }
    })
}
