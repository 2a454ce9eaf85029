// crates/server/src/cors.rs
//! Browser origin policy.
//!
//! The API hands out the whole data directory, so only pages the user runs
//! locally may read it: loopback origins, the desktop shell's own schemes,
//! and whatever `--allow-origin` adds. Any other origin gets no CORS headers
//! and the browser keeps the response from the page.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Schemes the desktop shell serves its webview from.
const SHELL_SCHEMES: &[&str] = &["tauri", "app", "chatshell"];

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

pub fn cors_layer(extra_origins: &[String]) -> CorsLayer {
    let extra = extra_origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|origin| is_allowed_origin(origin, &extra))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn is_allowed_origin(origin: &str, extra: &[String]) -> bool {
    if extra.iter().any(|allowed| allowed == origin) {
        return true;
    }
    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };
    if SHELL_SCHEMES.contains(&scheme) {
        return true;
    }
    if scheme != "http" && scheme != "https" {
        return false;
    }
    let host = match rest.rsplit_once(':') {
        // `[::1]` alone also contains colons; only strip a numeric port.
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => rest,
    };
    LOOPBACK_HOSTS.contains(&host)
}
