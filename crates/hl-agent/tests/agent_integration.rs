//! Agent integration tests
//!
//! Each test starts the agent router on an ephemeral port and talks to it
//! the way a browser would: WebSocket sessions through tokio-tungstenite
//! and proxied HTTP through reqwest.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use hl_agent::AgentState;
use hl_core::config::{AgentConfig, LogSource, ProxyRule};
use hl_protocol::{ControlMessage, TerminalSize};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

fn test_config() -> AgentConfig {
    AgentConfig {
        shell: "/bin/sh".to_string(),
        logs: BTreeMap::new(),
        proxies: vec![],
        ..Default::default()
    }
}

async fn start_agent(config: AgentConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AgentState::new(config).unwrap());
    tokio::spawn(hl_agent::serve(listener, state, std::future::pending()));
    addr
}

async fn open_ws(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    ws
}

/// Collect text frames until `needle` shows up; panics on timeout
async fn read_until(ws: &mut Ws, needle: &str) -> String {
    let collect = async {
        let mut seen = String::new();
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    seen.push_str(&text);
                    if seen.contains(needle) {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        seen
    };

    let seen = timeout(WAIT, collect).await.expect("timed out waiting for output");
    assert!(seen.contains(needle), "expected {:?} in {:?}", needle, seen);
    seen
}

/// Drain the socket until the server closes it; panics on timeout
async fn expect_closed(ws: &mut Ws) {
    let drain = async {
        while let Some(msg) = ws.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    };
    timeout(WAIT, drain).await.expect("server did not close the socket");
}

/// Wait for `PID:<digits>`; the echoed command line only has `PID:$!`
async fn read_pid(ws: &mut Ws) -> u32 {
    let pattern = regex::Regex::new(r"PID:(\d+)").unwrap();
    let collect = async {
        let mut seen = String::new();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                seen.push_str(&text);
                if let Some(caps) = pattern.captures(&seen) {
                    return caps[1].parse().ok();
                }
            }
        }
        None
    };

    timeout(WAIT, collect)
        .await
        .expect("timed out waiting for PID")
        .expect("no PID in output")
}

async fn send_control(ws: &mut Ws, message: ControlMessage) {
    ws.send(Message::Text(message.to_json())).await.unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_terminal_resize_applies_to_pty() {
    let addr = start_agent(test_config()).await;
    let mut ws = open_ws(addr, "/ws/terminal").await;

    send_control(&mut ws, ControlMessage::resize(TerminalSize::new(40, 100))).await;
    send_control(&mut ws, ControlMessage::input("stty size\n")).await;

    read_until(&mut ws, "40 100").await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_unrecognized_control_frames_are_ignored() {
    let addr = start_agent(test_config()).await;
    let mut ws = open_ws(addr, "/ws/terminal").await;

    ws.send(Message::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();
    ws.send(Message::Text("not json".to_string())).await.unwrap();
    send_control(&mut ws, ControlMessage::input("echo still-$((40+2))\n")).await;

    read_until(&mut ws, "still-42").await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_closing_terminal_kills_background_jobs() {
    let addr = start_agent(test_config()).await;
    let mut ws = open_ws(addr, "/ws/terminal").await;

    send_control(&mut ws, ControlMessage::input("sleep 1000 & echo PID:$!\n")).await;
    let pid = read_pid(&mut ws).await;
    assert!(hl_agent::pty::process_exists(pid));

    ws.close(None).await.unwrap();

    let gone = async {
        while hl_agent::pty::process_exists(pid) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    timeout(WAIT, gone).await.expect("background job survived teardown");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_deploy_runs_selected_script() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("install.sh"), "echo install-$((1+1))\n").unwrap();
    std::fs::write(dir.path().join("update.sh"), "echo update-$((2+2))\n").unwrap();

    let config = AgentConfig {
        script_dir: dir.path().to_path_buf(),
        ..test_config()
    };
    let addr = start_agent(config).await;

    let mut ws = open_ws(addr, "/ws/deploy?type=install").await;
    read_until(&mut ws, "install-2").await;
    expect_closed(&mut ws).await;

    let mut ws = open_ws(addr, "/ws/deploy?type=anything").await;
    read_until(&mut ws, "update-4").await;
    expect_closed(&mut ws).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminal_spawn_failure_reports_and_closes() {
    let config = AgentConfig {
        shell: "/nonexistent/hl-shell".to_string(),
        ..test_config()
    };
    let addr = start_agent(config).await;
    let mut ws = open_ws(addr, "/ws/terminal").await;

    read_until(&mut ws, "Error").await;
    expect_closed(&mut ws).await;
}

fn log_config(key: &str, path: &Path) -> AgentConfig {
    let mut logs = BTreeMap::new();
    logs.insert(key.to_string(), LogSource::at(path));
    AgentConfig {
        logs,
        ..test_config()
    }
}

#[tokio::test]
async fn test_log_unknown_key_reports_and_closes() {
    let dir = TempDir::new().unwrap();
    let addr = start_agent(log_config("app", &dir.path().join("app.log"))).await;
    let mut ws = open_ws(addr, "/ws/log?key=../../etc/passwd").await;

    read_until(&mut ws, "Unknown log key").await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_log_missing_file_reports_and_closes() {
    let dir = TempDir::new().unwrap();
    let addr = start_agent(log_config("app", &dir.path().join("app.log"))).await;
    let mut ws = open_ws(addr, "/ws/log?key=app").await;

    read_until(&mut ws, "Error").await;
    expect_closed(&mut ws).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_log_follow_streams_tail_then_appends() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("app.log");
    std::fs::write(&log, "first line\nsecond line\n").unwrap();

    let addr = start_agent(log_config("app", &log)).await;
    let mut ws = open_ws(addr, "/ws/log?key=app").await;

    read_until(&mut ws, "second line").await;

    let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all("third line 日志\n".as_bytes()).unwrap();
    file.flush().unwrap();

    read_until(&mut ws, "third line 日志").await;
}

#[tokio::test]
async fn test_log_download() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("app.log");
    std::fs::write(&log, "downloaded\n").unwrap();
    let addr = start_agent(log_config("app", &log)).await;

    let response = reqwest::get(format!("http://{}/api/log/download?key=app", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("app.log"));
    assert_eq!(response.text().await.unwrap(), "downloaded\n");

    let missing = reqwest::get(format!("http://{}/api/log/download?key=other", addr))
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

const CONSOLE_PAGE: &str = r#"<html><head><script src="/static/app.js"></script></head>
<body><a href="/">home</a><a href="//cdn.example.com/x">cdn</a></body></html>"#;

async fn console_index() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::X_FRAME_OPTIONS, "DENY"),
        ],
        CONSOLE_PAGE,
    )
}

async fn console_echo_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            if let AxumMessage::Text(text) = msg {
                if socket.send(AxumMessage::Text(format!("echo:{}", text))).await.is_err() {
                    break;
                }
            }
        }
    })
}

/// Echo socket that, like a console's object manager, needs a session cookie
async fn console_session_ws(headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let signed_in = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|cookie| cookie.split(';').any(|pair| pair.trim() == "token=abc"));
    if !signed_in {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    console_echo_ws(ws).await.into_response()
}

/// A stand-in admin console that assumes it owns the path root
async fn start_console() -> SocketAddr {
    let app = Router::new()
        .route("/", get(console_index))
        .route(
            "/static/app.js",
            get(|| async { ([(header::CONTENT_TYPE, "text/javascript")], "console.log(1);") }),
        )
        .route(
            "/echo/*rest",
            get(|uri: axum::http::Uri| async move { uri.to_string() }),
        )
        .route("/ws/echo", get(console_echo_ws))
        .route("/ws/objectManager", get(console_session_ws));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn start_proxying_agent() -> SocketAddr {
    let console = start_console().await;
    let config = AgentConfig {
        proxies: vec![ProxyRule {
            name: "console".to_string(),
            target: format!("http://{}", console),
            anchors: vec!["/static/".to_string(), "/ws/".to_string()],
        }],
        ..test_config()
    };
    start_agent(config).await
}

#[tokio::test]
async fn test_proxy_rewrites_html() {
    let addr = start_proxying_agent().await;

    let response = reqwest::get(format!("http://{}/api/proxy/console/", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().get(header::X_FRAME_OPTIONS).is_none());

    let declared = response.content_length();
    let body = response.text().await.unwrap();

    assert!(body.contains(r#"src="static/app.js""#));
    assert!(body.contains(r#"href="./""#));
    assert!(body.contains(r#"href="//cdn.example.com/x""#));
    assert_eq!(declared, Some(body.len() as u64));
}

#[tokio::test]
async fn test_proxy_recovers_deep_links() {
    let addr = start_proxying_agent().await;

    let script = reqwest::get(format!(
        "http://{}/api/proxy/console/some/page/static/app.js",
        addr
    ))
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    assert_eq!(script, "console.log(1);");

    let echoed = reqwest::get(format!("http://{}/api/proxy/console/echo/a/b?x=1", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(echoed, "/echo/a/b?x=1");
}

#[tokio::test]
async fn test_proxy_bare_mount_reloads_with_slash() {
    let addr = start_proxying_agent().await;

    let body = reqwest::get(format!("http://{}/api/proxy/console", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("location.replace"));
}

#[tokio::test]
async fn test_proxy_unreachable_upstream_is_bad_gateway() {
    let refused = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = AgentConfig {
        proxies: vec![ProxyRule {
            name: "gone".to_string(),
            target: format!("http://{}", refused),
            anchors: vec![],
        }],
        ..test_config()
    };
    let addr = start_agent(config).await;

    let response = reqwest::get(format!("http://{}/api/proxy/gone/", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_proxy_passes_websockets_through() {
    let addr = start_proxying_agent().await;
    let mut ws = open_ws(addr, "/api/proxy/console/ui/ws/echo").await;

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    read_until(&mut ws, "echo:hello").await;
}

#[tokio::test]
async fn test_proxy_websocket_carries_session_cookie() {
    let addr = start_proxying_agent().await;

    let mut request = format!("ws://{}/api/proxy/console/ws/objectManager", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::COOKIE, "theme=dark; token=abc".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();

    ws.send(Message::Text("hi".to_string())).await.unwrap();
    read_until(&mut ws, "echo:hi").await;
}

#[tokio::test]
async fn test_proxy_websocket_without_cookie_is_closed() {
    let addr = start_proxying_agent().await;
    let mut ws = open_ws(addr, "/api/proxy/console/ws/objectManager").await;

    let _ = ws.send(Message::Text("hi".to_string())).await;
    expect_closed(&mut ws).await;
}
