//! Authentication middleware for protected endpoints
//!
//! Requires `Authorization: Bearer <token>` and verifies it through the
//! [`TokenVerifier`]. With OAuth disabled every request passes as
//! implicitly authenticated - a development mode the server warns about at
//! startup.
//!
//! All rejections look identical to the client (uniform 401 body plus a
//! `WWW-Authenticate` challenge); the concrete reason only reaches the log.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use super::router::AppState;
use crate::Error;
use crate::config::OAuthConfig;
use crate::oauth::TokenInfo;

/// Identity attached to a request once authentication has run.
/// Downstream stages read it from request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Claims of the verified token; `None` when authentication is
    /// disabled and the request passed implicitly
    pub token: Option<TokenInfo>,
}

impl AuthContext {
    /// Identity used when authentication is disabled
    #[must_use]
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let oauth = &state.config.oauth;

    if !oauth.enabled {
        request.extensions_mut().insert(AuthContext::anonymous());
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        warn!(path = %path, "Missing bearer token");
        return unauthorized_response(oauth);
    };

    match state.verifier.verify(&token).await {
        Ok(info) => {
            debug!(path = %path, sub = ?info.sub, "Authenticated request");
            request
                .extensions_mut()
                .insert(AuthContext { token: Some(info) });
            next.run(request).await
        }
        Err(Error::IntrospectionUnavailable(reason)) => {
            // Outage, not an attack - logged apart so operators can tell,
            // answered identically so probes cannot.
            error!(path = %path, %reason, "Authorization server unavailable, failing closed");
            unauthorized_response(oauth)
        }
        Err(_) => {
            warn!(path = %path, "Rejected bearer token");
            unauthorized_response(oauth)
        }
    }
}

/// Build the `WWW-Authenticate` challenge for this gateway
#[must_use]
pub fn challenge_header(oauth: &OAuthConfig) -> String {
    let mut challenge = String::from("Bearer realm=\"logan-gateway\"");
    if !oauth.resource_url.is_empty() {
        let resource = oauth.resource_url.trim_end_matches('/');
        challenge.push_str(&format!(
            ", resource_metadata=\"{resource}/.well-known/oauth-protected-resource\""
        ));
    }
    if !oauth.required_scopes.is_empty() {
        challenge.push_str(&format!(", scope=\"{}\"", oauth.required_scopes.join(" ")));
    }
    challenge.push_str(
        ", error=\"invalid_token\", error_description=\"Missing or invalid bearer token\"",
    );
    challenge
}

/// Uniform 401 response. Never reveals whether the token was missing,
/// malformed, expired, or under-scoped.
fn unauthorized_response(oauth: &OAuthConfig) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge_header(oauth))],
        Json(json!({
            "error": "unauthorized",
            "error_description": "Missing or invalid bearer token"
        })),
    )
        .into_response()
}
