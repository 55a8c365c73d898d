//! Bearer-token verification against the authorization server

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, warn};

use super::cache::{TokenCache, token_digest};
use super::introspection::TokenInfo;
use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Verifies bearer tokens via RFC 7662 introspection, with a hash-keyed
/// result cache in front of the network call.
///
/// Every failure mode - unreachable endpoint, non-success status, garbage
/// body - is a verification failure. Nothing here ever fails open.
pub struct TokenVerifier {
    config: OAuthConfig,
    client_secret: String,
    required_scopes: HashSet<String>,
    client: Client,
    cache: TokenCache,
}

impl TokenVerifier {
    /// Create a verifier from the OAuth configuration
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.introspection_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client_secret: config.resolve_client_secret(),
            required_scopes: config.required_scope_set(),
            client,
            cache: TokenCache::new(),
        })
    }

    /// Verify a raw bearer token.
    ///
    /// Cached results are re-validated before being trusted: an entry whose
    /// underlying token has expired since it was cached is evicted and the
    /// token goes back through live introspection.
    pub async fn verify(&self, raw_token: &str) -> Result<TokenInfo> {
        if self.config.introspection_url.is_empty() {
            warn!("No introspection endpoint configured, rejecting token");
            return Err(Error::Unauthorized);
        }

        let key = token_digest(raw_token);
        let now = Utc::now().timestamp();

        if self.config.cache_enabled {
            if let Some(info) = self.cache.get(&key, now) {
                if !info.active {
                    debug!("Cached introspection result: inactive");
                    return Err(Error::Unauthorized);
                }
                match info.validate_claims(&self.required_scopes, self.audience(), now) {
                    Ok(()) => {
                        debug!("Token verified from cache");
                        return Ok(info);
                    }
                    Err(reason) => {
                        debug!(%reason, "Cached entry no longer valid, re-verifying");
                        self.cache.remove(&key);
                    }
                }
            }
        }

        let info = self.introspect(raw_token).await?;

        if self.config.cache_enabled {
            #[allow(clippy::cast_possible_wrap)]
            let ttl_secs = self.config.cache_ttl.as_secs() as i64;
            self.cache.insert(key, info.clone(), now, ttl_secs);
        }

        info.validate_claims(&self.required_scopes, self.audience(), now)
            .map_err(|reason| {
                debug!(%reason, "Token rejected");
                Error::Unauthorized
            })?;

        debug!(sub = ?info.sub, client_id = ?info.client_id, "Token verified");
        Ok(info)
    }

    /// Call the introspection endpoint (form POST with client-credential
    /// Basic auth, bounded timeout).
    async fn introspect(&self, raw_token: &str) -> Result<TokenInfo> {
        let response = self
            .client
            .post(&self.config.introspection_url)
            .basic_auth(&self.config.client_id, Some(&self.client_secret))
            .form(&[("token", raw_token), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Introspection request failed");
                Error::IntrospectionUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Introspection endpoint returned non-success");
            return Err(Error::IntrospectionUnavailable(format!("HTTP {status}")));
        }

        response.json::<TokenInfo>().await.map_err(|e| {
            warn!(error = %e, "Introspection response was not decodable");
            Error::IntrospectionUnavailable(e.to_string())
        })
    }

    fn audience(&self) -> Option<&str> {
        self.config.audience.as_deref()
    }

    /// The verification cache, exposed for the periodic sweep
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}
