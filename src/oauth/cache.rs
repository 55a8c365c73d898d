//! Verification result cache keyed by token hash
//!
//! Avoids an introspection round-trip for every request bearing the same
//! token. Keys are SHA-256 digests of the raw token so bearer credentials
//! never sit in memory longer than the request that carried them.

use std::fmt::Write as _;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::introspection::TokenInfo;

/// Compute the cache key for a raw bearer token (SHA-256 hex digest)
#[must_use]
pub fn token_digest(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    let result = hasher.finalize();
    let mut hex = String::with_capacity(result.len() * 2);
    for byte in result {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// A cached introspection result with an absolute expiry
struct CachedToken {
    info: TokenInfo,
    /// Unix seconds after which this entry must not be served
    expires_at: i64,
}

/// Thread-safe verification cache.
///
/// Concurrent requests racing on the same token may each introspect once;
/// last writer wins and the map stays consistent either way.
pub struct TokenCache {
    entries: DashMap<String, CachedToken>,
}

impl TokenCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get a live entry. Expired entries are evicted, not returned.
    pub fn get(&self, key: &str, now: i64) -> Option<TokenInfo> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.info.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Store a verification result.
    ///
    /// The entry expires at `now + ttl_secs`, capped by the token's own
    /// `exp` so a short-lived token is never cached past its lifetime.
    pub fn insert(&self, key: String, info: TokenInfo, now: i64, ttl_secs: i64) {
        let mut expires_at = now.saturating_add(ttl_secs);
        if let Some(exp) = info.exp {
            expires_at = expires_at.min(exp);
        }
        self.entries.insert(key, CachedToken { info, expires_at });
    }

    /// Drop one entry (failed re-validation)
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove all entries whose expiry has passed. Returns how many were
    /// removed. Driven by the periodic sweep.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
