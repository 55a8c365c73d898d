//! Per-client session management
//!
//! Sessions correlate multiple requests from the same client without
//! re-verifying the bearer token on every call. Clients receive the session
//! id in the `Mcp-Session-Id` response header and echo it on subsequent
//! requests.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::oauth::TokenInfo;
use crate::{Error, Result};

/// Client metadata captured at session creation
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    /// User-Agent header, if any
    pub user_agent: Option<String>,
    /// Remote peer address, if known
    pub remote_addr: Option<String>,
}

/// A server-side session record
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session identifier. Random, never derived from the token.
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last request time; the expiry sweep keys off this
    pub last_activity: DateTime<Utc>,
    /// Client metadata
    pub meta: ClientMeta,
    /// Claims of the token that authenticated this session, set at
    /// creation; absent in development mode
    pub token: Option<TokenInfo>,
}

impl Session {
    /// Subject claim of the authenticating token, if any
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.token.as_ref().and_then(|t| t.sub.as_deref())
    }
}

/// Session table with a bounded number of concurrent sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    timeout: Duration,
    max_sessions: usize,
}

impl SessionManager {
    /// Create an empty session table
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout: config.timeout,
            max_sessions: config.max_sessions,
        }
    }

    /// Look up or create the session for a request.
    ///
    /// A recognized, non-expired id has its activity timestamp advanced and
    /// is returned as-is. Otherwise a new session is created; if the table
    /// is full an eager expiry sweep runs first, and if it stays full the
    /// request is rejected with [`Error::CapacityExceeded`].
    pub fn get_or_create(
        &self,
        session_id: Option<&str>,
        meta: ClientMeta,
        token: Option<TokenInfo>,
    ) -> Result<Session> {
        let now = Utc::now();

        if let Some(id) = session_id {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(id) {
                if !is_expired(session, now, self.timeout) {
                    // Strictly advance even if the clock hasn't ticked
                    session.last_activity = if now > session.last_activity {
                        now
                    } else {
                        session.last_activity + TimeDelta::nanoseconds(1)
                    };
                    return Ok(session.clone());
                }
                // Expired id presented - drop it and fall through to create
                sessions.remove(id);
                debug!(session_id = %id, "Expired session presented, recreating");
            }
        }

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            let before = sessions.len();
            sessions.retain(|_, s| !is_expired(s, now, self.timeout));
            let evicted = before - sessions.len();
            if evicted > 0 {
                debug!(evicted, "Evicted expired sessions under capacity pressure");
            }
            if sessions.len() >= self.max_sessions {
                warn!(
                    max_sessions = self.max_sessions,
                    "Session table full, rejecting new session"
                );
                return Err(Error::CapacityExceeded);
            }
        }

        let session = Session {
            id: format!("sess-{}", Uuid::new_v4()),
            created_at: now,
            last_activity: now,
            meta,
            token,
        };
        sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, count = sessions.len(), "Created session");
        Ok(session)
    }

    /// Get a session snapshot by id
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Current number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove sessions idle past the timeout. Returns how many were removed.
    /// Driven by the periodic sweep; safe to run concurrently with requests.
    pub fn expire_idle(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !is_expired(s, now, self.timeout));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Expired idle sessions");
        }
        removed
    }
}

fn is_expired(session: &Session, now: DateTime<Utc>, timeout: Duration) -> bool {
    let idle = now.signed_duration_since(session.last_activity);
    idle > TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}
