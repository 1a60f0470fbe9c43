//! Reverse proxy for upstream admin consoles
//!
//! Each [`ProxyRule`] is mounted at `/api/proxy/<name>/`. Plain requests are
//! forwarded with reqwest; HTML responses are buffered and rewritten, all
//! other bodies stream through untouched. WebSocket upgrades are relayed to
//! the upstream's `ws://` equivalent with the client's credentials attached.

pub mod rewrite;
mod websocket;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

use hl_core::config::ProxyRule;

use crate::state::AgentState;
use rewrite::{is_html, sanitize_request_headers, sanitize_response_headers, upstream_path};

/// Path prefix all mounts live under
pub const PROXY_BASE: &str = "/api/proxy";

/// Largest request body forwarded upstream
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

/// Served at the bare mount so relative links resolve beneath it
const TRAILING_SLASH_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Loading</title></head>
<body><script>window.location.replace(window.location.pathname + "/" + window.location.search + window.location.hash);</script></body></html>
"#;

/// Errors while forwarding to an upstream
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Client request body could not be read
    #[error("Failed to read request body: {0}")]
    Body(#[from] axum::Error),

    /// Upstream unreachable or returned garbage
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Body(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

fn mount_for(rule: &ProxyRule) -> String {
    format!("{}/{}", PROXY_BASE, rule.name)
}

fn find_rule<'a>(state: &'a AgentState, params: &HashMap<String, String>) -> Option<&'a ProxyRule> {
    params.get("name").and_then(|name| state.config.proxy(name))
}

/// `ANY /api/proxy/:name`
pub async fn mount_handler(
    State(state): State<Arc<AgentState>>,
    Path(params): Path<HashMap<String, String>>,
) -> Response {
    match find_rule(&state, &params) {
        Some(_) => Html(TRAILING_SLASH_PAGE).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `ANY /api/proxy/:name/*rest`
pub async fn proxy_handler(
    State(state): State<Arc<AgentState>>,
    Path(params): Path<HashMap<String, String>>,
    ws: Option<WebSocketUpgrade>,
    req: Request,
) -> Response {
    let Some(rule) = find_rule(&state, &params) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut path = upstream_path(rule, req.uri().path(), &mount_for(rule));
    if let Some(query) = req.uri().query() {
        path.push('?');
        path.push_str(query);
    }

    if let Some(ws) = ws {
        let url = websocket::upstream_url(&rule.target, &path);
        tracing::debug!("Proxying WebSocket {} -> {}", req.uri().path(), url);
        let headers = websocket::forwarded_headers(req.headers());
        return offer_protocols(ws, &headers)
            .on_upgrade(move |socket| websocket::relay(socket, url, headers));
    }

    let url = format!("{}{}", rule.target.trim_end_matches('/'), path);
    tracing::debug!("Proxying {} {} -> {}", req.method(), req.uri().path(), url);

    match forward(&state.http, &url, req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Proxy to {} failed: {}", url, e);
            e.into_response()
        }
    }
}

/// Accept whichever subprotocols the client offered, so the upstream can pick
fn offer_protocols(ws: WebSocketUpgrade, headers: &HeaderMap) -> WebSocketUpgrade {
    let offered: Vec<String> = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|protocol| protocol.trim().to_string())
        .filter(|protocol| !protocol.is_empty())
        .collect();

    if offered.is_empty() {
        ws
    } else {
        ws.protocols(offered)
    }
}

async fn forward(client: &reqwest::Client, url: &str, req: Request) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY).await?;

    let mut headers = parts.headers;
    sanitize_request_headers(&mut headers);

    let upstream = client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    sanitize_response_headers(&mut headers);

    if !is_html(&headers) {
        let body = Body::from_stream(upstream.bytes_stream());
        return Ok(build_response(status, headers, body));
    }

    let raw = upstream.bytes().await?;
    let rewritten = rewrite::rewrite_root_relative(&raw).into_owned();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));

    Ok(build_response(status, headers, Body::from(rewritten)))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
