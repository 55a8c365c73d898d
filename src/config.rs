//! Configuration management

use std::{collections::HashSet, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier. Missing files are
    /// silently skipped. Variables land in the process environment for
    /// `env:VAR` secret resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// Public operational endpoint toggles
    pub endpoints: EndpointsConfig,
    /// OAuth configuration
    pub oauth: OAuthConfig,
    /// Upstream MCP server the gateway fronts
    pub upstream: UpstreamConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// TLS termination
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            max_body_size: 10 * 1024 * 1024, // 10MB
            tls: TlsConfig::default(),
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS termination
    pub enabled: bool,
    /// Path to PEM certificate chain
    pub cert_path: String,
    /// Path to PEM private key
    pub key_path: String,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Emit CORS headers
    pub enabled: bool,
    /// Allowed origins. `"*"` echoes the request's own Origin back.
    /// The list also feeds the Origin validation (DNS-rebinding defense),
    /// which always runs regardless of `enabled`.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout before a session is expired
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            max_sessions: 100,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Public operational endpoint toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Serve GET /health
    pub health: bool,
    /// Serve GET /metrics
    pub metrics: bool,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            health: true,
            metrics: true,
        }
    }
}

/// OAuth configuration for inbound request authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Require bearer tokens on protected endpoints.
    /// Disabled means every request is implicitly authenticated
    /// (development mode) - the gateway warns loudly at startup.
    pub enabled: bool,
    /// Authorization server issuer URL
    pub issuer_url: String,
    /// RFC 7662 token introspection endpoint.
    /// Empty while `enabled` means every verification fails closed.
    pub introspection_url: String,
    /// Client id for the introspection call (Basic auth)
    pub client_id: String,
    /// Client secret. Supports `env:VAR_NAME` indirection.
    pub client_secret: String,
    /// Scopes a token must carry to pass
    pub required_scopes: Vec<String>,
    /// Public URL of this resource server (used in the challenge header
    /// and the protected-resource metadata document)
    pub resource_url: String,
    /// Expected audience; unset skips the audience check
    pub audience: Option<String>,
    /// Cache verification results
    pub cache_enabled: bool,
    /// Cache time-to-live. A token's own `exp` caps this per entry.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Interval of the background cache sweep
    #[serde(with = "humantime_serde")]
    pub cache_sweep_interval: Duration,
    /// Bound on the introspection round-trip; a timeout fails closed
    #[serde(with = "humantime_serde")]
    pub introspection_timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: String::new(),
            introspection_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            required_scopes: vec!["mcp:tools".to_string()],
            resource_url: String::new(),
            audience: None,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(60),
            introspection_timeout: Duration::from_secs(10),
        }
    }
}

impl OAuthConfig {
    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }

    /// Required scopes as a set for superset checks
    #[must_use]
    pub fn required_scope_set(&self) -> HashSet<String> {
        self.required_scopes.iter().cloned().collect()
    }
}

/// Upstream MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the upstream protocol endpoint (e.g.
    /// `http://127.0.0.1:8002/mcp`)
    pub url: String,
    /// Request timeout towards the upstream
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8002/mcp".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be
    /// parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Environment overrides (LOGAN_GATEWAY_ prefix, __ nesting)
        figment = figment.merge(Env::prefixed("LOGAN_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                    Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }

    /// Validate cross-field constraints
    fn validate(&self) -> Result<()> {
        if self.session.max_sessions == 0 {
            return Err(Error::Config(
                "session.max_sessions must be at least 1".to_string(),
            ));
        }
        if self.server.tls.enabled
            && (self.server.tls.cert_path.is_empty() || self.server.tls.key_path.is_empty())
        {
            return Err(Error::Config(
                "server.tls requires cert_path and key_path".to_string(),
            ));
        }
        if self.oauth.enabled && self.oauth.introspection_url.is_empty() {
            // Not fatal: verification fails closed per request, but the
            // operator almost certainly misconfigured something.
            tracing::warn!(
                "oauth.enabled is set with an empty introspection_url - all tokens will be rejected"
            );
        }
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
