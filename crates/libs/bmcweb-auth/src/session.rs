//! Process-wide session store.
//!
//! A session is created by a successful login (Redfish `Sessions` POST), by
//! HTTP Basic authentication for the duration of one request, or by a verified
//! client certificate for the lifetime of one connection. The store is shared
//! across every connection and is internally synchronized.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bmcweb_auth::role::Role;
//! use bmcweb_auth::session::{PersistenceType, SessionStore};
//!
//! let store = SessionStore::new(Duration::from_secs(3600));
//! let session = store.generate_user_session(
//!     "root",
//!     Role::Administrator,
//!     None,
//!     PersistenceType::Timeout,
//!     false,
//! );
//!
//! let found = store.login_session_by_token(&session.session_token).unwrap();
//! assert_eq!(found.unique_id, session.unique_id);
//!
//! store.remove_session(&session);
//! assert!(store.login_session_by_token(&session.session_token).is_none());
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric, rngs::OsRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::role::Role;

const SESSION_TOKEN_LEN: usize = 20;
const UNIQUE_ID_LEN: usize = 10;
const CSRF_TOKEN_LEN: usize = 20;

/// Session timeout applied when none is configured.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long a session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PersistenceType {
    /// Lives until logout or until idle for longer than the store timeout.
    Timeout,
    /// Lives for a single request (Basic auth) or connection (mutual TLS).
    SingleRequest,
}

/// An authenticated user session.
#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub unique_id: String,
    #[serde(skip)]
    pub session_token: String,
    #[serde(skip)]
    pub csrf_token: String,
    pub username: String,
    pub role: Role,
    pub client_ip: Option<IpAddr>,
    pub persistence: PersistenceType,
    pub from_mutual_tls: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    session: Arc<UserSession>,
    last_used: Instant,
}

#[derive(Debug)]
struct Inner {
    by_token: HashMap<String, Entry>,
    timeout: Duration,
}

/// Internally synchronized map of live sessions, keyed by token.
#[derive(Debug)]
pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_token: HashMap::new(),
                timeout,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = timeout;
    }

    /// Creates and stores a new session with fresh random tokens.
    pub fn generate_user_session(
        &self,
        username: &str,
        role: Role,
        client_ip: Option<IpAddr>,
        persistence: PersistenceType,
        from_mutual_tls: bool,
    ) -> Arc<UserSession> {
        let mut inner = self.lock();

        let mut session_token = random_string(SESSION_TOKEN_LEN);
        while inner.by_token.contains_key(&session_token) {
            session_token = random_string(SESSION_TOKEN_LEN);
        }
        let mut unique_id = random_string(UNIQUE_ID_LEN);
        while inner
            .by_token
            .values()
            .any(|e| e.session.unique_id == unique_id)
        {
            unique_id = random_string(UNIQUE_ID_LEN);
        }

        let session = Arc::new(UserSession {
            unique_id,
            session_token: session_token.clone(),
            csrf_token: random_string(CSRF_TOKEN_LEN),
            username: username.to_string(),
            role,
            client_ip,
            persistence,
            from_mutual_tls,
            created_at: Utc::now(),
        });

        inner.by_token.insert(
            session_token,
            Entry {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        info!(
            "Created {:?} session {} for {username}",
            persistence, session.unique_id
        );
        session
    }

    /// Looks up a session by token and marks it as used.
    ///
    /// Idle sessions are expired before the lookup.
    pub fn login_session_by_token(&self, token: &str) -> Option<Arc<UserSession>> {
        let mut inner = self.lock();
        Self::apply_session_timeouts(&mut inner);
        let entry = inner.by_token.get_mut(token)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    /// Looks up a session by its public id.
    pub fn get_session_by_uid(&self, unique_id: &str) -> Option<Arc<UserSession>> {
        let mut inner = self.lock();
        Self::apply_session_timeouts(&mut inner);
        inner
            .by_token
            .values()
            .find(|e| e.session.unique_id == unique_id)
            .map(|e| e.session.clone())
    }

    /// Removes a session. Returns `false` if it was already gone.
    pub fn remove_session(&self, session: &UserSession) -> bool {
        let removed = self.lock().by_token.remove(&session.session_token).is_some();
        if removed {
            debug!("Removed session {}", session.unique_id);
        }
        removed
    }

    /// Public ids of the sessions that outlive a request.
    pub fn unique_ids(&self) -> Vec<String> {
        let mut inner = self.lock();
        Self::apply_session_timeouts(&mut inner);
        let mut ids: Vec<String> = inner
            .by_token
            .values()
            .filter(|e| e.session.persistence == PersistenceType::Timeout)
            .map(|e| e.session.unique_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_session_timeouts(inner: &mut Inner) {
        let timeout = inner.timeout;
        inner.by_token.retain(|_, entry| {
            let keep = entry.session.persistence != PersistenceType::Timeout
                || entry.last_used.elapsed() < timeout;
            if !keep {
                info!("Session {} timed out", entry.session.unique_id);
            }
            keep
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

/// Random alphanumeric string from the OS generator.
pub fn random_string(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[test]
    fn tokens_are_unique_and_opaque() {
        let store = store();
        let a = store.generate_user_session("a", Role::ReadOnly, None, PersistenceType::Timeout, false);
        let b = store.generate_user_session("b", Role::ReadOnly, None, PersistenceType::Timeout, false);
        assert_ne!(a.session_token, b.session_token);
        assert_ne!(a.unique_id, b.unique_id);
        assert_eq!(a.session_token.len(), SESSION_TOKEN_LEN);
        assert!(a.session_token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn lookup_by_uid() {
        let store = store();
        let session =
            store.generate_user_session("root", Role::Administrator, None, PersistenceType::Timeout, false);
        let found = store.get_session_by_uid(&session.unique_id).unwrap();
        assert_eq!(found.username, "root");
        assert!(store.get_session_by_uid("nope").is_none());
    }

    #[test]
    fn single_request_sessions_are_not_listed() {
        let store = store();
        let kept = store.generate_user_session("a", Role::Operator, None, PersistenceType::Timeout, false);
        store.generate_user_session("b", Role::Operator, None, PersistenceType::SingleRequest, false);
        assert_eq!(store.unique_ids(), vec![kept.unique_id.clone()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::ZERO);
        let session = store.generate_user_session("a", Role::Operator, None, PersistenceType::Timeout, false);
        let tls = store.generate_user_session("b", Role::Operator, None, PersistenceType::SingleRequest, true);
        assert!(store.login_session_by_token(&session.session_token).is_none());
        // Connection-bound sessions are removed by their owner, not by time.
        assert!(store.login_session_by_token(&tls.session_token).is_some());
    }

    #[test]
    fn double_remove_is_harmless() {
        let store = store();
        let session = store.generate_user_session("a", Role::Operator, None, PersistenceType::Timeout, false);
        assert!(store.remove_session(&session));
        assert!(!store.remove_session(&session));
        assert!(store.is_empty());
    }
}
