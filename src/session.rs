//! Cookie-backed server-side sessions.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use rand::{distributions::Alphanumeric, Rng};

/// Name of the cookie that carries the session id.
pub const SESSION_COOKIE: &str = "abserve.sid";

const SESSION_ID_LEN: usize = 32;

/// Server-side session state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// User id stored through `POST /set/user`.
    pub user_id: Option<String>,
    created_at: Instant,
}

impl Session {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// In-memory session store. Sessions live for a fixed time after creation.
///
/// Cloning the store is cheap: every clone shares the same sessions.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> SessionStore {
        SessionStore {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `None` for unknown and expired sessions.
    pub fn load(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(id)
            .filter(|session| !session.is_expired(self.ttl))
            .cloned()
    }

    pub fn create(&self) -> Session {
        let session = Session {
            id: generate_session_id(),
            user_id: None,
            created_at: Instant::now(),
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Store `user_id` in a live session. Returns `false` if the session is unknown or expired.
    pub fn set_user_id(&self, id: &str, user_id: impl Into<String>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired(self.ttl) => {
                session.user_id = Some(user_id.into());
                true
            }
            _ => false,
        }
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Set-Cookie` header value for a session.
    pub fn cookie(&self, session: &Session) -> String {
        format!(
            "{SESSION_COOKIE}={}; Path=/; Max-Age={}; HttpOnly",
            session.id,
            self.ttl.as_secs()
        )
    }
}

fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Extract the session id from a `Cookie` header value.
pub fn session_id_from_cookies(cookies: &str) -> Option<&str> {
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .filter(|id| !id.is_empty())
}
