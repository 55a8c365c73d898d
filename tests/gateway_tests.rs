//! End-to-end gateway tests
//!
//! Drives the real router via `tower::ServiceExt::oneshot` with a stub
//! protocol handler, covering the public endpoints, the security gate, the
//! session lifecycle, and the metrics pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use logan_gateway::config::{Config, CorsConfig, OAuthConfig, SessionConfig};
use logan_gateway::gateway::{Gateway, SESSION_ID_HEADER};
use logan_gateway::handler::ProtocolHandler;

/// Stub for the tool-dispatch subsystem: answers every request with a
/// small JSON body echoing the path.
struct EchoHandler;

#[async_trait]
impl ProtocolHandler for EchoHandler {
    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let body = json!({ "ok": true, "path": request.uri().path() }).to_string();
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }
}

fn test_gateway(config: Config) -> Gateway {
    Gateway::with_handler(config, Arc::new(EchoHandler)).unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// Public endpoints
// =========================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = test_gateway(Config::default());
    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["server"], "logan-gateway");
    assert_eq!(body["active_sessions"], 0);
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let gateway = test_gateway(Config::default());
    let app = gateway.router();

    for _ in 0..3 {
        app.clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
    }

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_requests"], 3);
    assert_eq!(body["successful_requests"], 3);
    assert_eq!(body["failed_requests"], 0);
    assert_eq!(body["auth_failures"], 0);
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_resource_metadata_endpoint() {
    let config = Config {
        oauth: OAuthConfig {
            issuer_url: "https://auth.example.com".to_string(),
            resource_url: "https://gateway.example.com".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .uri("/.well-known/oauth-protected-resource")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["resource"], "https://gateway.example.com");
    assert_eq!(body["authorization_servers"][0], "https://auth.example.com");
    assert_eq!(body["bearer_methods_supported"][0], "header");
}

#[tokio::test]
async fn test_unknown_route_404() {
    let gateway = test_gateway(Config::default());
    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_disabled_endpoints_404() {
    let mut config = Config::default();
    config.endpoints.health = false;
    config.endpoints.metrics = false;
    let gateway = test_gateway(config);
    let app = gateway.router();

    for path in ["/health", "/metrics"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

// =========================================================================
// Authentication
// =========================================================================

#[tokio::test]
async fn test_missing_token_yields_401_with_challenge() {
    let config = Config {
        oauth: OAuthConfig {
            enabled: true,
            introspection_url: "http://127.0.0.1:1/introspect".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(challenge.contains("Bearer"));
    assert!(challenge.contains("error=\"invalid_token\""));

    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_auth_disabled_passes_through() {
    let gateway = test_gateway(Config::default());
    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(SESSION_ID_HEADER));
    assert_eq!(body_json(response).await["ok"], true);
}

#[tokio::test]
async fn test_auth_failures_counted() {
    let config = Config {
        oauth: OAuthConfig {
            enabled: true,
            introspection_url: "http://127.0.0.1:1/introspect".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);
    let app = gateway.router();

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total_requests"], 1);
    assert_eq!(body["failed_requests"], 1);
    assert_eq!(body["auth_failures"], 1);
}

// =========================================================================
// Sessions
// =========================================================================

#[tokio::test]
async fn test_session_continuity_across_requests() {
    let gateway = test_gateway(Config::default());
    let state = gateway.state();
    let app = gateway.router();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = first
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let activity_after_first = state.sessions.get(&session_id).unwrap().last_activity;

    let second = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(SESSION_ID_HEADER, &session_id)
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    let echoed = second
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert_eq!(echoed, session_id);
    assert_eq!(state.sessions.count(), 1);

    let activity_after_second = state.sessions.get(&session_id).unwrap().last_activity;
    assert!(activity_after_second > activity_after_first);
}

#[tokio::test]
async fn test_session_capacity_503() {
    let config = Config {
        session: SessionConfig {
            max_sessions: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);
    let app = gateway.router();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // A second client with no session id needs a new slot: rejected
    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(second).await["error"], "session_capacity_exceeded");
}

// =========================================================================
// Security gate
// =========================================================================

#[tokio::test]
async fn test_rebinding_defense_rejects_evil_origin_on_loopback_host() {
    let gateway = test_gateway(Config::default());

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(header::HOST, "localhost:8000")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "origin_forbidden");
}

#[tokio::test]
async fn test_loopback_origin_allowed_on_loopback_host() {
    let gateway = test_gateway(Config::default());

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::HOST, "localhost:8000")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_wildcard_echoes_origin() {
    let config = Config {
        cors: CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);

    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
            .and_then(|v| v.to_str().ok()),
        Some("Mcp-Session-Id")
    );
}

#[tokio::test]
async fn test_preflight_short_circuits() {
    let config = Config {
        cors: CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        },
        oauth: OAuthConfig {
            enabled: true,
            introspection_url: "http://127.0.0.1:1/introspect".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let gateway = test_gateway(config);

    // No Authorization header, yet no 401: the preflight never reaches auth
    let response = gateway
        .router()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/mcp")
                .header(header::ORIGIN, "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );
}
