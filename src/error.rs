//! Error types for the Logan gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing, invalid, expired, or under-scoped bearer token.
    ///
    /// The client-facing message is uniform regardless of the concrete
    /// reason, so probes cannot distinguish a malformed token from an
    /// expired or under-scoped one.
    #[error("Unauthorized")]
    Unauthorized,

    /// The authorization server could not be reached or answered garbage.
    /// Treated as an authentication failure (fail closed) but logged as an
    /// outage so operators can tell it apart from an attack.
    #[error("Token introspection unavailable: {0}")]
    IntrospectionUnavailable(String),

    /// Origin validation failed (DNS-rebinding defense)
    #[error("Origin not allowed")]
    OriginRejected,

    /// Session table is at capacity
    #[error("Session capacity exceeded")]
    CapacityExceeded,

    /// Unknown route
    #[error("Not found")]
    NotFound,

    /// Upstream protocol handler failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error terminates the request with.
    ///
    /// Introspection outages map to 401, never 502: an unreachable
    /// authorization server must not make a token look more valid than a
    /// reachable one saying "no".
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::IntrospectionUnavailable(_) => StatusCode::UNAUTHORIZED,
            Self::OriginRejected => StatusCode::FORBIDDEN,
            Self::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag used in JSON error bodies
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unauthorized | Self::IntrospectionUnavailable(_) => "unauthorized",
            Self::OriginRejected => "origin_forbidden",
            Self::CapacityExceeded => "session_capacity_exceeded",
            Self::NotFound => "not_found",
            Self::Upstream(_) => "upstream_error",
            _ => "internal_error",
        }
    }
}
