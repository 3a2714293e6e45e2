//! QR login session identity and phase
//!
//! A `LoginSession` is issued once and never mutated; a refresh replaces it
//! with a new one carrying a different `StateToken`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque identifier correlating a QR code with its confirmation status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateToken(String);

impl StateToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One issued QR login session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    /// Where the QR image can be fetched
    pub qr_image_ref: Url,
    /// Token the status endpoint is queried with
    pub state_token: StateToken,
    /// When the session was issued
    pub created_at: DateTime<Utc>,
}

impl LoginSession {
    pub fn new(qr_image_ref: Url, state_token: StateToken) -> Self {
        Self {
            qr_image_ref,
            state_token,
            created_at: Utc::now(),
        }
    }
}

/// Stage of one login attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Init,
    Scanning,
    Scanned,
    Confirmed,
    Expired,
}

impl Phase {
    /// Position in `Init < Scanning < Scanned < {Confirmed, Expired}`
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Init => 0,
            Phase::Scanning => 1,
            Phase::Scanned => 2,
            Phase::Confirmed | Phase::Expired => 3,
        }
    }

    /// No further transition is possible for the current session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Confirmed | Phase::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Scanning => "scanning",
            Phase::Scanned => "scanned",
            Phase::Confirmed => "confirmed",
            Phase::Expired => "expired",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the login state machine, read by presentation code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginState {
    pub phase: Phase,
    pub session: Option<LoginSession>,
}

impl LoginState {
    /// Token of the active session, if one has been issued
    pub fn active_token(&self) -> Option<&StateToken> {
        self.session.as_ref().map(|s| &s.state_token)
    }
}
