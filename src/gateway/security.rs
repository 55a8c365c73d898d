//! Security gate: CORS emission and Origin validation
//!
//! Runs before routing and before authentication, so no verification work
//! is spent on requests from untrustworthy origins. Two independent checks:
//!
//! - CORS header emission (when enabled), with `OPTIONS` preflights
//!   short-circuited to 204 after headers are set;
//! - Origin validation against the allow-list, with a stricter rule for
//!   loopback hosts (DNS-rebinding defense): a browser page on an attacker
//!   origin must not be able to reach a locally-bound gateway even when the
//!   allow-list is `*`.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;
use url::Url;

use super::router::AppState;
use crate::Error;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, Mcp-Session-Id, MCP-Protocol-Version";
const EXPOSED_HEADERS: &str = "Mcp-Session-Id";
const MAX_AGE_SECS: &str = "86400";

/// Security gate middleware
pub async fn security_gate(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cors = &state.config.cors;

    let origin = header_str(request.headers(), header::ORIGIN);
    let host = header_str(request.headers(), header::HOST);

    // Preflights never reach the router when CORS handling is on
    if cors.enabled && request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(
            response.headers_mut(),
            origin.as_deref(),
            &cors.allowed_origins,
        );
        return response;
    }

    if let Some(ref origin) = origin {
        if !origin_allowed(origin, host.as_deref(), &cors.allowed_origins) {
            warn!(%origin, host = ?host, "Rejected request from disallowed origin");
            let err = Error::OriginRejected;
            return (err.status_code(), Json(json!({ "error": err.tag() }))).into_response();
        }
    }

    let mut response = next.run(request).await;
    if cors.enabled {
        apply_cors_headers(
            response.headers_mut(),
            origin.as_deref(),
            &cors.allowed_origins,
        );
    }
    response
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Compute the value of `Access-Control-Allow-Origin`, if any.
///
/// A `*` entry echoes the request's own Origin (or `*` for origin-less
/// requests) so responses stay cacheable per-origin.
fn allow_origin_value(origin: Option<&str>, allowed: &[String]) -> Option<String> {
    if allowed.iter().any(|o| o == "*") {
        return Some(origin.unwrap_or("*").to_string());
    }
    origin
        .filter(|o| allowed.iter().any(|a| a == o))
        .map(String::from)
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<&str>, allowed: &[String]) {
    if let Some(value) = allow_origin_value(origin, allowed) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE_SECS),
    );
}

/// Validate a request's Origin against the allow-list.
///
/// Requests whose `Host` is loopback only accept loopback origins or
/// origins named literally in the allow-list; the wildcard does not apply
/// there.
fn origin_allowed(origin: &str, host: Option<&str>, allowed: &[String]) -> bool {
    let exact_match = allowed.iter().any(|a| a == origin);

    if host.is_some_and(host_is_loopback) {
        return origin_is_loopback(origin) || exact_match;
    }

    allowed.iter().any(|o| o == "*") || exact_match
}

/// Whether a `Host` header value names a loopback address
fn host_is_loopback(host: &str) -> bool {
    let bare = match host.rsplit_once(':') {
        Some((h, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => h,
        _ => host,
    };
    bare.eq_ignore_ascii_case("localhost") || bare.starts_with("127.") || bare == "[::1]"
}

/// Whether an Origin header value points at a loopback address
fn origin_is_loopback(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    match url.host_str() {
        Some(host) => {
            host.eq_ignore_ascii_case("localhost") || host.starts_with("127.") || host == "[::1]"
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_echoes_request_origin() {
        let allowed = vec!["*".to_string()];
        assert_eq!(
            allow_origin_value(Some("https://app.example.com"), &allowed),
            Some("https://app.example.com".to_string())
        );
        assert_eq!(allow_origin_value(None, &allowed), Some("*".to_string()));
    }

    #[test]
    fn test_exact_list_match() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert_eq!(
            allow_origin_value(Some("https://app.example.com"), &allowed),
            Some("https://app.example.com".to_string())
        );
        assert_eq!(allow_origin_value(Some("https://evil.example"), &allowed), None);
        assert_eq!(allow_origin_value(None, &allowed), None);
    }

    #[test]
    fn test_host_is_loopback() {
        assert!(host_is_loopback("localhost"));
        assert!(host_is_loopback("localhost:8000"));
        assert!(host_is_loopback("127.0.0.1:8001"));
        assert!(host_is_loopback("[::1]:8001"));
        assert!(!host_is_loopback("gateway.example.com"));
        assert!(!host_is_loopback("gateway.example.com:443"));
    }

    #[test]
    fn test_origin_is_loopback() {
        assert!(origin_is_loopback("http://localhost:3000"));
        assert!(origin_is_loopback("https://127.0.0.1"));
        assert!(!origin_is_loopback("https://evil.example"));
        assert!(!origin_is_loopback("file://localhost"));
        assert!(!origin_is_loopback("not a url"));
    }

    #[test]
    fn test_rebinding_defense_on_loopback_host() {
        // Attacker page reaching a locally-bound gateway: rejected even
        // with a wildcard allow-list
        let wildcard = vec!["*".to_string()];
        assert!(!origin_allowed(
            "https://evil.example",
            Some("localhost:8000"),
            &wildcard
        ));

        // A loopback origin on a loopback host is fine
        assert!(origin_allowed(
            "http://localhost:3000",
            Some("localhost:8000"),
            &[]
        ));

        // Explicit allow-list entries still work on loopback hosts
        assert!(origin_allowed(
            "https://dashboard.example.com",
            Some("127.0.0.1:8001"),
            &["https://dashboard.example.com".to_string()]
        ));
    }

    #[test]
    fn test_non_loopback_host_uses_allow_list() {
        assert!(origin_allowed(
            "https://anything.example",
            Some("gateway.example.com"),
            &["*".to_string()]
        ));
        assert!(!origin_allowed(
            "https://evil.example",
            Some("gateway.example.com"),
            &["https://app.example.com".to_string()]
        ));
    }
}
