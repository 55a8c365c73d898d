//! HTTP router and handlers
//!
//! Route classes: public operational endpoints (health, metrics, OAuth
//! resource metadata), the protected protocol endpoints (`/`, `/mcp`,
//! `/mcp/*`) and a 404 fallback. The request pipeline is composed from
//! middleware stages, each able to short-circuit with a terminal response:
//! metrics -> panic guard -> security gate -> route -> auth -> session ->
//! forward.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::auth::{AuthContext, auth_middleware};
use super::security::security_gate;
use crate::config::Config;
use crate::handler::ProtocolHandler;
use crate::metrics::MetricsCollector;
use crate::oauth::{ProtectedResourceMetadata, TokenVerifier};
use crate::session::{ClientMeta, SessionManager};
use crate::{Error, SERVER_NAME};

/// Session id header exchanged with clients
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Protocol version header; logged when absent, not enforced
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Shared application state, one instance per gateway
pub struct AppState {
    /// Gateway configuration
    pub config: Config,
    /// Bearer token verifier
    pub verifier: Arc<TokenVerifier>,
    /// Session table
    pub sessions: Arc<SessionManager>,
    /// Request metrics
    pub metrics: Arc<MetricsCollector>,
    /// The tool-dispatch subsystem behind this gateway
    pub handler: Arc<dyn ProtocolHandler>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", any(forward_handler))
        .route("/mcp", any(forward_handler))
        .route("/mcp/{*path}", any(forward_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            session_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let mut router = Router::new().route(
        "/.well-known/oauth-protected-resource",
        get(metadata_handler),
    );
    if state.config.endpoints.health {
        router = router.route("/health", get(health_handler));
    }
    if state.config.endpoints.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .merge(protected)
        .fallback(not_found_handler)
        // Stage order is bottom-up: the last layer added runs first
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            security_gate,
        ))
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Metrics middleware. Every request - public, rejected, or forwarded -
/// contributes exactly one update.
async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();
    let success = !status.is_client_error() && !status.is_server_error();
    let auth_failure = status == StatusCode::UNAUTHORIZED;
    state.metrics.record_request(success, auth_failure, elapsed_ms);

    response
}

/// Session middleware for protected endpoints. Runs after authentication;
/// attaches the session id to every response it lets through.
async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let presented_id = request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let meta = ClientMeta {
        user_agent: request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|info| info.0.to_string()),
    };

    let token = request
        .extensions()
        .get::<AuthContext>()
        .and_then(|ctx| ctx.token.clone());

    let session = match state
        .sessions
        .get_or_create(presented_id.as_deref(), meta, token)
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Session rejected");
            return error_response(&e);
        }
    };

    let session_id = session.id.clone();
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// Forward an authenticated, sessioned request to the protocol handler
async fn forward_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response {
    if request.headers().get(PROTOCOL_VERSION_HEADER).is_none() {
        debug!(path = %request.uri().path(), "Request without protocol version header");
    }
    state.handler.handle(request).await
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_sessions": state.sessions.count(),
    }))
}

/// Metrics snapshot handler
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot(state.sessions.count()))
}

/// OAuth protected-resource metadata handler (RFC 9728 discovery)
async fn metadata_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ProtectedResourceMetadata::from_config(&state.config.oauth))
}

/// Fallback for unknown routes
async fn not_found_handler() -> Response {
    error_response(&Error::NotFound)
}

/// Terminal error response with the taxonomy's status and tag
fn error_response(err: &Error) -> Response {
    (err.status_code(), Json(json!({ "error": err.tag() }))).into_response()
}
