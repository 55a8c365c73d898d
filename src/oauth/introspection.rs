//! RFC 7662 token introspection response and claims validation

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Token introspection response (RFC 7662 §2.2).
///
/// Everything except `active` is optional on the wire; absent time-based
/// claims simply skip their check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Whether the token is currently active at the authorization server
    pub active: bool,

    /// Granted scopes, space-delimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Expiration timestamp (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at timestamp (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Not-before timestamp (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Subject identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience. Servers emit either a single string or an array; both
    /// wire forms are accepted.
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl TokenInfo {
    /// An inactive response carrying no claims (what a well-behaved server
    /// returns for unknown tokens)
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            exp: None,
            iat: None,
            nbf: None,
            sub: None,
            aud: Vec::new(),
            iss: None,
        }
    }

    /// Granted scopes as a set
    #[must_use]
    pub fn scopes(&self) -> HashSet<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Validate the claims against the gateway's requirements at time `now`
    /// (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns the first failing claim. Callers log the reason but answer
    /// the client uniformly.
    pub fn validate_claims(
        &self,
        required_scopes: &HashSet<String>,
        audience: Option<&str>,
        now: i64,
    ) -> Result<(), ClaimError> {
        if !self.active {
            return Err(ClaimError::Inactive);
        }
        if let Some(exp) = self.exp {
            if exp <= now {
                return Err(ClaimError::Expired);
            }
        }
        if let Some(nbf) = self.nbf {
            if nbf > now {
                return Err(ClaimError::NotYetValid);
            }
        }
        if let Some(expected) = audience {
            if !self.aud.iter().any(|a| a == expected) {
                return Err(ClaimError::AudienceMismatch);
            }
        }
        let granted = self.scopes();
        if let Some(missing) = required_scopes.iter().find(|s| !granted.contains(*s)) {
            return Err(ClaimError::MissingScope(missing.clone()));
        }
        Ok(())
    }
}

/// Why a token's claims were rejected. Logged, never echoed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Authorization server reported the token inactive
    Inactive,
    /// `exp` is in the past
    Expired,
    /// `nbf` is in the future
    NotYetValid,
    /// Configured audience is not in the token's `aud`
    AudienceMismatch,
    /// A required scope was not granted
    MissingScope(String),
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "token inactive"),
            Self::Expired => write!(f, "token expired"),
            Self::NotYetValid => write!(f, "token not yet valid"),
            Self::AudienceMismatch => write!(f, "audience mismatch"),
            Self::MissingScope(s) => write!(f, "missing required scope '{s}'"),
        }
    }
}

/// Deserialize an audience that may be either a string or an array
fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match Option::<StringOrVec>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(StringOrVec::String(s)) => Ok(vec![s]),
        Some(StringOrVec::Vec(v)) => Ok(v),
    }
}
