//! JSON wire types shared by the client and the identity service
//!
//! Every reply is an envelope `{success, message?, code?}` plus
//! endpoint-specific fields.

use crate::error::{DomainFailure, DomainFailureKind};
use serde::{Deserialize, Serialize};

/// Confirmation status of a QR login session as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Scanned,
    Confirmed,
    Expired,
}

impl PollStatus {
    /// The session will not change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStatus::Confirmed | PollStatus::Expired)
    }
}

/// Common part of every reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Envelope {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            code: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            code: None,
        }
    }

    pub fn failure(kind: DomainFailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            code: Some(kind.as_code().to_string()),
        }
    }

    /// Convert a `success: false` envelope into a domain failure
    pub fn to_failure(&self, fallback: &str) -> Option<DomainFailure> {
        if self.success {
            return None;
        }
        let kind = self
            .code
            .as_deref()
            .map(DomainFailureKind::from_code)
            .unwrap_or_default();
        let message = self
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| fallback.to_string());
        Some(DomainFailure::new(kind, message))
    }
}

/// Implemented by every reply type so callers can check the envelope uniformly
pub trait Reply {
    fn envelope(&self) -> &Envelope;
}

macro_rules! impl_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl Reply for $ty {
            fn envelope(&self) -> &Envelope {
                &self.envelope
            }
        })*
    };
}

/// Plain acknowledgement (`/login`, `/register`, `/send_verification`, `/logout`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// `GET /wechat_qrcode`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodeResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qrcode_url: Option<String>,
    /// Older services name this field `session_key`
    #[serde(default, alias = "session_key", skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Seconds until the session expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

/// `GET /check_wechat_login/{state}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStatusResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PollStatus>,
    /// Boolean form used by older services instead of `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
}

impl LoginStatusResponse {
    /// Effective status, falling back to the boolean form
    pub fn poll_status(&self) -> Option<PollStatus> {
        self.status.or(match self.logged_in {
            Some(true) => Some(PollStatus::Confirmed),
            Some(false) => Some(PollStatus::Pending),
            None => None,
        })
    }
}

/// `GET /captcha`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_url: Option<String>,
}

/// Public profile of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `GET /user_info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfoResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl_reply!(
    ActionResponse,
    QrCodeResponse,
    LoginStatusResponse,
    CaptchaResponse,
    UserInfoResponse,
);

/// `POST /login` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub captcha: String,
}

/// `POST /register` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub verification_code: String,
    pub password: String,
    pub confirm_password: String,
}

/// `POST /send_verification` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendVerificationRequest {
    pub email: String,
}
