//! Logan Gateway Library
//!
//! Authenticated session gateway in front of an OCI Logging Analytics MCP
//! server.
//!
//! # Features
//!
//! - **Bearer authentication**: OAuth 2.1 tokens verified via RFC 7662
//!   introspection, with a hash-keyed result cache
//! - **Sessions**: per-client sessions over the `Mcp-Session-Id` header,
//!   bounded and time-expired
//! - **Security gate**: CORS emission and Host/Origin cross-checking
//!   against DNS rebinding
//! - **Operations**: health, metrics, and OAuth resource-metadata discovery
//!   endpoints; graceful shutdown; optional TLS termination

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod metrics;
pub mod oauth;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Server name reported by the health endpoint
pub const SERVER_NAME: &str = "logan-gateway";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
