//! Hand-off boundary to the tool-dispatch subsystem
//!
//! The gateway authenticates and sessions a request, then hands it to a
//! [`ProtocolHandler`] unchanged and mirrors whatever comes back. Errors
//! inside the handler are its own concern; nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use reqwest::Client;
use tracing::{debug, error};

use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// The single collaborator interface of the gateway: given an
/// authenticated, sessioned request, produce the response.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Handle the request and write a response. Must always produce exactly
    /// one response; the gateway does not retry.
    async fn handle(&self, request: Request<Body>) -> Response<Body>;
}

/// Reverse proxy to the upstream MCP server's Streamable HTTP endpoint.
///
/// Request headers relevant to the protocol are forwarded; the gateway's
/// own `Authorization` header is not, since the upstream sits behind this
/// gateway precisely so it does not have to verify tokens itself.
pub struct UpstreamHandler {
    client: Client,
    base_url: String,
    max_body_size: usize,
}

/// Request headers passed through to the upstream
const FORWARDED_HEADERS: [&str; 4] = [
    "content-type",
    "accept",
    "mcp-session-id",
    "mcp-protocol-version",
];

impl UpstreamHandler {
    /// Create a proxy towards the configured upstream
    pub fn new(config: &UpstreamConfig, max_body_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_body_size,
        })
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();

        // `/` and `/mcp` both map to the upstream endpoint itself;
        // `/mcp/foo` maps to `<base>/foo`.
        let suffix = parts.uri.path().strip_prefix("/mcp").unwrap_or("");
        let mut url = format!("{}{}", self.base_url, suffix);
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| Error::Upstream(format!("Invalid method: {e}")))?;

        let body_bytes = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| Error::Upstream(format!("Failed to read request body: {e}")))?;

        let mut upstream_request = self.client.request(method, &url);
        for name in FORWARDED_HEADERS {
            if let Some(value) = parts.headers.get(name) {
                if let Ok(value) = value.to_str() {
                    upstream_request = upstream_request.header(name, value);
                }
            }
        }

        debug!(url = %url, "Forwarding to upstream");
        let upstream_response = upstream_request
            .body(body_bytes.to_vec())
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = StatusCode::from_u16(upstream_response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut builder = Response::builder().status(status);
        for name in ["content-type", "mcp-session-id", "mcp-protocol-version"] {
            if let Some(value) = upstream_response.headers().get(name) {
                if let Ok(value) = value.to_str() {
                    builder = builder.header(name, value);
                }
            }
        }

        // Stream the body through; upstream responses may be long-lived SSE
        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
    }
}

#[async_trait]
impl ProtocolHandler for UpstreamHandler {
    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Upstream hand-off failed");
                let body = serde_json::json!({
                    "error": e.tag(),
                    "message": "Upstream request failed",
                })
                .to_string();
                Response::builder()
                    .status(e.status_code())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap_or_else(|_| {
                        Response::new(Body::from("{\"error\":\"upstream_error\"}"))
                    })
            }
        }
    }
}
