//! OAuth Protected Resource Metadata (RFC 9728)
//!
//! Served at `/.well-known/oauth-protected-resource` so clients can discover
//! which authorization server issues tokens for this gateway.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::OAuthConfig;

/// OAuth Protected Resource Metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// Supported bearer token methods
    #[serde(default)]
    pub bearer_methods_supported: Vec<String>,

    /// Supported scopes (may arrive as string or array due to
    /// implementation bugs in the wild)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Human-readable documentation link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
}

impl ProtectedResourceMetadata {
    /// Build the document this gateway serves, from its OAuth configuration
    #[must_use]
    pub fn from_config(config: &OAuthConfig) -> Self {
        let authorization_servers = if config.issuer_url.is_empty() {
            Vec::new()
        } else {
            vec![config.issuer_url.clone()]
        };

        Self {
            resource: config.resource_url.clone(),
            authorization_servers,
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: config.required_scopes.clone(),
            resource_documentation: Some(
                "https://docs.oracle.com/en-us/iaas/logging-analytics/index.html".to_string(),
            ),
        }
    }

    /// Get the first authorization server URL
    pub fn authorization_server(&self) -> Option<&str> {
        self.authorization_servers
            .first()
            .map(std::string::String::as_str)
    }
}

/// Deserialize scopes that may be either a string or array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}
