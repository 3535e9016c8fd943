//! Session store interface.
//!
//! Credential persistence (keyring or file-backed) lives outside this
//! crate; the engine only consumes sessions through the [`SessionStore`]
//! trait to inject cookies and headers into outgoing requests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

use crate::errors::{EngineError, EngineResult};

/// One stored cookie, schema shared between the HTTP and browser paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Unix timestamp; 0 means a session cookie.
    #[serde(default)]
    pub expires: u64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// "Strict", "Lax", "None", or empty.
    #[serde(default)]
    pub same_site: String,
}

/// A named authentication session: cookies plus extra request headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// When the session as a whole expires, if known.
    #[serde(default)]
    pub expires_at: Option<SystemTime>,
}

impl Session {
    /// Render cookies as a single `Cookie` request-header value.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Read access to named sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by name. Returns [`EngineError::Session`] when the
    /// name is unknown or the session has expired.
    async fn load_session(&self, name: &str) -> EngineResult<Session>;
}

/// In-memory session store, used in tests and as a default collaborator.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, session: Session) {
        self.sessions.insert(name.into(), session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, name: &str) -> EngineResult<Session> {
        let session = self
            .sessions
            .get(name)
            .map(|s| s.clone())
            .ok_or_else(|| EngineError::Session(format!("session not found: {name}")))?;

        if let Some(expiry) = session.expires_at
            && expiry <= SystemTime::now()
        {
            return Err(EngineError::Session(format!("session expired: {name}")));
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cookie(name: &str, value: &str) -> SessionCookie {
        SessionCookie {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".into(),
            expires: 0,
            http_only: false,
            secure: false,
            same_site: String::new(),
        }
    }

    #[tokio::test]
    async fn load_returns_stored_session() {
        let store = MemorySessionStore::new();
        store.insert(
            "gh",
            Session {
                cookies: vec![cookie("sid", "abc"), cookie("theme", "dark")],
                ..Session::default()
            },
        );

        let session = store.load_session("gh").await.unwrap();
        assert_eq!(session.cookie_header(), "sid=abc; theme=dark");
    }

    #[tokio::test]
    async fn missing_and_expired_sessions_error() {
        let store = MemorySessionStore::new();
        assert!(store.load_session("nope").await.is_err());

        store.insert(
            "old",
            Session {
                expires_at: Some(SystemTime::now() - Duration::from_secs(60)),
                ..Session::default()
            },
        );
        assert!(store.load_session("old").await.is_err());
    }
}
