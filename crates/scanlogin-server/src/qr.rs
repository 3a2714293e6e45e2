//! QR login sessions
//!
//! 1. `issue` creates a state token valid for the QR lifetime
//! 2. The mobile side reports a scan, then confirms as a user
//! 3. The first `poll` that sees the confirmation consumes the token and
//!    hands the user to the polling session; later polls report expired

use chrono::{DateTime, Duration, Utc};
use scanlogin_core::PollStatus;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// QR session errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("QR code expired, please refresh")]
    Expired,
    #[error("QR code already confirmed")]
    AlreadyConfirmed,
}

pub type QrResult<T> = Result<T, QrError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QrStatus {
    Pending,
    Scanned,
    Confirmed { user_id: Uuid },
}

#[derive(Debug, Clone)]
struct QrSession {
    status: QrStatus,
    expires_at: DateTime<Utc>,
}

impl QrSession {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A freshly issued state token
#[derive(Debug, Clone)]
pub struct QrIssue {
    pub state: String,
    /// Seconds until expiry
    pub expires_in: i64,
}

/// Result of a status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrPoll {
    Pending,
    Scanned,
    /// Confirmed by `user_id`; the token has been consumed
    Confirmed(Uuid),
    Expired,
}

impl QrPoll {
    pub fn status(&self) -> PollStatus {
        match self {
            QrPoll::Pending => PollStatus::Pending,
            QrPoll::Scanned => PollStatus::Scanned,
            QrPoll::Confirmed(_) => PollStatus::Confirmed,
            QrPoll::Expired => PollStatus::Expired,
        }
    }
}

/// Registry of live QR login sessions
pub struct QrLoginRegistry {
    sessions: RwLock<HashMap<String, QrSession>>,
    lifetime: Duration,
}

impl QrLoginRegistry {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Issue a new state token
    pub async fn issue(&self) -> QrIssue {
        let state = Uuid::new_v4().to_string();
        let session = QrSession {
            status: QrStatus::Pending,
            expires_at: Utc::now() + self.lifetime,
        };

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_expired());
        sessions.insert(state.clone(), session);

        info!("Issued QR login session {}", state);
        QrIssue {
            state,
            expires_in: self.lifetime.num_seconds(),
        }
    }

    /// The token exists and has not expired
    pub async fn is_live(&self, state: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(state).is_some_and(|s| !s.is_expired())
    }

    /// Record that a device scanned the code
    pub async fn mark_scanned(&self, state: &str) -> QrResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = live_session(&mut sessions, state)?;
        match session.status {
            QrStatus::Pending => {
                session.status = QrStatus::Scanned;
                debug!("QR session {} scanned", state);
                Ok(())
            }
            QrStatus::Scanned => Ok(()),
            QrStatus::Confirmed { .. } => Err(QrError::AlreadyConfirmed),
        }
    }

    /// Confirm the login as `user_id` from the scanning device
    pub async fn confirm(&self, state: &str, user_id: Uuid) -> QrResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = live_session(&mut sessions, state)?;
        match session.status {
            QrStatus::Pending | QrStatus::Scanned => {
                session.status = QrStatus::Confirmed { user_id };
                info!("QR session {} confirmed", state);
                Ok(())
            }
            QrStatus::Confirmed { .. } => Err(QrError::AlreadyConfirmed),
        }
    }

    /// Current status of `state`; unknown tokens read as expired
    pub async fn poll(&self, state: &str) -> QrPoll {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(state) else {
            return QrPoll::Expired;
        };
        if session.is_expired() {
            sessions.remove(state);
            return QrPoll::Expired;
        }

        let status = session.status;
        match status {
            QrStatus::Pending => QrPoll::Pending,
            QrStatus::Scanned => QrPoll::Scanned,
            QrStatus::Confirmed { user_id } => {
                sessions.remove(state);
                QrPoll::Confirmed(user_id)
            }
        }
    }
}

fn live_session<'a>(
    sessions: &'a mut HashMap<String, QrSession>,
    state: &str,
) -> QrResult<&'a mut QrSession> {
    if sessions.get(state).map_or(true, QrSession::is_expired) {
        sessions.remove(state);
        return Err(QrError::Expired);
    }
    sessions.get_mut(state).ok_or(QrError::Expired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> QrLoginRegistry {
        QrLoginRegistry::new(Duration::seconds(300))
    }

    #[tokio::test]
    async fn test_issue_is_unique_and_pending() {
        let registry = registry();
        let a = registry.issue().await;
        let b = registry.issue().await;

        assert_ne!(a.state, b.state);
        assert_eq!(a.expires_in, 300);
        assert_eq!(registry.poll(&a.state).await, QrPoll::Pending);
    }

    #[tokio::test]
    async fn test_scan_confirm_consumes_token() {
        let registry = registry();
        let issue = registry.issue().await;
        let user = Uuid::new_v4();

        registry.mark_scanned(&issue.state).await.unwrap();
        assert_eq!(registry.poll(&issue.state).await, QrPoll::Scanned);

        registry.confirm(&issue.state, user).await.unwrap();
        assert_eq!(registry.poll(&issue.state).await, QrPoll::Confirmed(user));
        assert_eq!(registry.poll(&issue.state).await, QrPoll::Expired);
    }

    #[tokio::test]
    async fn test_second_confirmation_rejected() {
        let registry = registry();
        let issue = registry.issue().await;

        registry.confirm(&issue.state, Uuid::new_v4()).await.unwrap();
        assert_eq!(
            registry.confirm(&issue.state, Uuid::new_v4()).await,
            Err(QrError::AlreadyConfirmed)
        );
        assert_eq!(
            registry.mark_scanned(&issue.state).await,
            Err(QrError::AlreadyConfirmed)
        );
    }

    #[tokio::test]
    async fn test_expired_session() {
        let registry = QrLoginRegistry::new(Duration::zero());
        let issue = registry.issue().await;

        assert!(!registry.is_live(&issue.state).await);
        assert_eq!(registry.mark_scanned(&issue.state).await, Err(QrError::Expired));
        assert_eq!(registry.poll(&issue.state).await, QrPoll::Expired);
    }

    #[tokio::test]
    async fn test_unknown_token_reads_expired() {
        let registry = registry();
        assert_eq!(registry.poll("nope").await, QrPoll::Expired);
        assert_eq!(QrPoll::Expired.status(), PollStatus::Expired);
    }
}
