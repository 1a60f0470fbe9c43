//! WebSocket passthrough to an upstream console

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use axum::http::{header, HeaderMap, HeaderName};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client headers carried onto the upstream handshake
pub const FORWARDED_HEADERS: [HeaderName; 4] = [
    header::COOKIE,
    header::AUTHORIZATION,
    header::ORIGIN,
    header::SEC_WEBSOCKET_PROTOCOL,
];

/// `http://host` + `/path` -> `ws://host/path` (and `https` -> `wss`)
pub fn upstream_url(target: &str, path: &str) -> String {
    let target = target.trim_end_matches('/');
    let base = if let Some(rest) = target.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = target.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        target.to_string()
    };
    format!("{}{}", base, path)
}

/// Keep only the client headers the upstream handshake needs
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in headers.get_all(&name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Relay frames between the client and `url` until either side closes
pub async fn relay(mut client_socket: WebSocket, url: String, headers: HeaderMap) {
    let server_socket = match connect_upstream(&url, headers).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("WebSocket upstream {} refused: {}", url, e);
            let _ = client_socket.send(AxumMessage::Close(None)).await;
            return;
        }
    };

    if let Err(e) = pump(client_socket, server_socket).await {
        tracing::debug!("WebSocket proxy to {} ended: {}", url, e);
    }
}

async fn connect_upstream(url: &str, headers: HeaderMap) -> anyhow::Result<UpstreamSocket> {
    let mut request = url.into_client_request()?;
    request.headers_mut().extend(headers);

    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

async fn pump(client_socket: WebSocket, server_socket: UpstreamSocket) -> anyhow::Result<()> {
    let (mut client_tx, mut client_rx) = client_socket.split();
    let (mut server_tx, mut server_rx) = server_socket.split();

    let client_to_server = async {
        while let Some(msg) = client_rx.next().await {
            let forward = match msg? {
                AxumMessage::Text(text) => TungsteniteMessage::Text(text),
                AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
                AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
                AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
                AxumMessage::Close(_) => TungsteniteMessage::Close(None),
            };
            server_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    let server_to_client = async {
        while let Some(msg) = server_rx.next().await {
            let forward = match msg? {
                TungsteniteMessage::Text(text) => AxumMessage::Text(text),
                TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
                TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
                TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
                TungsteniteMessage::Close(_) => AxumMessage::Close(None),
                TungsteniteMessage::Frame(_) => continue,
            };
            client_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = client_to_server => result?,
        result = server_to_client => result?,
    }

    Ok(())
}
