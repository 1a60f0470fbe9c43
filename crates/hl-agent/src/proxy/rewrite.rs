//! Path recovery and response rewriting for proxied consoles
//!
//! Consoles served under `/api/proxy/<name>/` assume they own the path
//! root. Requests are mapped back onto the upstream's own paths, and HTML
//! coming back has its root-relative `src`/`href`/`action` values made
//! relative so they resolve beneath the mount.

use std::borrow::Cow;
use std::sync::OnceLock;

use axum::http::header::{self, HeaderMap, HeaderName};
use regex::bytes::{Captures, Regex};

use hl_core::config::ProxyRule;

/// Response headers that stop a console from rendering inside a frame
pub const FRAME_BLOCKING_HEADERS: &[&str] = &["x-frame-options", "content-security-policy"];

/// Headers that describe one hop and must not be forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Map a request path under `mount` to the path to request upstream.
///
/// The first anchor (in rule order) found anywhere in the path wins and the
/// upstream path starts at its last occurrence. Without a match the mount
/// prefix is stripped.
pub fn upstream_path(rule: &ProxyRule, request_path: &str, mount: &str) -> String {
    for anchor in &rule.anchors {
        if let Some(index) = request_path.rfind(anchor.as_str()) {
            return request_path[index..].to_string();
        }
    }

    let rest = request_path.strip_prefix(mount).unwrap_or(request_path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

fn root_relative_attr() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(?P<attr>\s(?:src|href|action)\s*=\s*)(?P<quote>["'])/(?P<next>[^/])"#)
            .expect("attribute pattern is a compile-time constant")
    })
}

/// Make root-relative `src`, `href` and `action` values relative.
///
/// `/static/app.js` becomes `static/app.js` and a bare `/` becomes `./`.
/// Protocol-relative `//host` values, absolute URLs and attributes such as
/// `data-src` are left alone.
pub fn rewrite_root_relative(html: &[u8]) -> Cow<'_, [u8]> {
    root_relative_attr().replace_all(html, |caps: &Captures<'_>| {
        let mut out = Vec::with_capacity(caps[0].len() + 1);
        out.extend_from_slice(&caps["attr"]);
        out.extend_from_slice(&caps["quote"]);
        if caps["next"] == caps["quote"] {
            out.extend_from_slice(b"./");
        }
        out.extend_from_slice(&caps["next"]);
        out
    })
}

/// Whether a `Content-Type` marks an HTML document
pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// Prepare client request headers for the upstream leg
pub fn sanitize_request_headers(headers: &mut HeaderMap) {
    headers.remove(header::HOST);
    // Compressed bodies cannot be rewritten
    headers.remove(header::ACCEPT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    remove_all(headers, HOP_BY_HOP_HEADERS);
}

/// Prepare upstream response headers for the client leg
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    remove_all(headers, FRAME_BLOCKING_HEADERS);
    remove_all(headers, HOP_BY_HOP_HEADERS);
}

fn remove_all(headers: &mut HeaderMap, names: &[&'static str]) {
    for name in names {
        headers.remove(HeaderName::from_static(name));
    }
}
