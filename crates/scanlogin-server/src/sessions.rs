//! Cookie-backed browser sessions
//!
//! A session carries the signed-in user and the captcha issued to it.
//! Session ids live in an http-only cookie. Sessions idle for longer than
//! the store's lifetime are dropped the next time a session is created.

use crate::captcha::Captcha;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "scanlogin_session";

/// Server-side state of one browser session
#[derive(Debug, Clone)]
pub struct SessionData {
    pub user_id: Option<Uuid>,
    pub captcha: Option<Captcha>,
    last_seen: DateTime<Utc>,
}

impl SessionData {
    fn new() -> Self {
        Self {
            user_id: None,
            captcha: None,
            last_seen: Utc::now(),
        }
    }

    fn is_idle(&self, lifetime: Duration) -> bool {
        Utc::now() >= self.last_seen + lifetime
    }
}

/// In-memory session table
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    lifetime: Duration,
}

impl SessionStore {
    /// Store whose sessions end after `lifetime` without a request
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Resolve the session for a request, creating one if the cookie is
    /// missing, unknown or idle. The returned jar carries the cookie to set.
    pub async fn resolve(&self, jar: CookieJar) -> (CookieJar, String) {
        if let Some(id) = self.current(&jar).await {
            return (jar, id);
        }

        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_idle(self.lifetime));
        if sessions.len() < before {
            debug!("Pruned {} idle browser sessions", before - sessions.len());
        }
        sessions.insert(id.clone(), SessionData::new());
        debug!("Created browser session {}", id);
        (jar.add(session_cookie(&id)), id)
    }

    /// Session id from the cookie, if it names a live session. Counts as
    /// activity on that session.
    pub async fn current(&self, jar: &CookieJar) -> Option<String> {
        let id = jar.get(SESSION_COOKIE)?.value().to_string();
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        if session.is_idle(self.lifetime) {
            sessions.remove(&id);
            debug!("Browser session {} expired", id);
            return None;
        }
        session.last_seen = Utc::now();
        Some(id)
    }

    /// Number of sessions held, idle ones included until the next prune
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn user(&self, id: &str) -> Option<Uuid> {
        self.sessions.read().await.get(id).and_then(|s| s.user_id)
    }

    pub async fn set_user(&self, id: &str, user_id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.user_id = Some(user_id);
        }
    }

    /// Store a new captcha for the session, replacing any previous one
    pub async fn set_captcha(&self, id: &str, captcha: Captcha) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.captcha = Some(captcha);
        }
    }

    /// Current captcha without consuming it
    pub async fn captcha(&self, id: &str) -> Option<Captcha> {
        self.sessions
            .read()
            .await
            .get(id)
            .and_then(|s| s.captcha.clone())
    }

    /// Remove and return the captcha; every login attempt uses one up
    pub async fn take_captcha(&self, id: &str) -> Option<Captcha> {
        self.sessions
            .write()
            .await
            .get_mut(id)
            .and_then(|s| s.captcha.take())
    }

    /// Drop the session entirely
    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }
}

fn session_cookie(id: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Removal cookie for the session
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}
