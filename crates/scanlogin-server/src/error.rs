//! API errors and their JSON envelopes

use crate::captcha::CaptchaError;
use crate::qr::QrError;
use crate::users::StoreError;
use crate::verification::VerificationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scanlogin_core::protocol::{ActionResponse, Envelope};
use scanlogin_core::{DomainFailure, DomainFailureKind};
use thiserror::Error;
use tracing::error;

/// Error returned by request handlers
///
/// Rejections are answered with HTTP 200 and `success: false` so clients
/// can show the message; only missing authentication and internal faults
/// use error status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(#[from] DomainFailure),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn rejected(kind: DomainFailureKind, message: impl Into<String>) -> Self {
        ApiError::Rejected(DomainFailure::new(kind, message))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken | StoreError::EmailTaken => {
                ApiError::rejected(DomainFailureKind::AlreadyRegistered, err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QrError> for ApiError {
    fn from(err: QrError) -> Self {
        let kind = match err {
            QrError::Expired => DomainFailureKind::QrExpired,
            QrError::AlreadyConfirmed => DomainFailureKind::Other,
        };
        ApiError::rejected(kind, err.to_string())
    }
}

impl From<CaptchaError> for ApiError {
    fn from(err: CaptchaError) -> Self {
        ApiError::rejected(DomainFailureKind::CaptchaMismatch, err.to_string())
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        ApiError::rejected(DomainFailureKind::InvalidVerificationCode, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ApiError::Rejected(failure) => {
                (StatusCode::OK, Envelope::failure(failure.kind, failure.message))
            }
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Envelope::failure(DomainFailureKind::NotAuthenticated, message),
            ),
            ApiError::Internal(message) => {
                error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Envelope::failure(DomainFailureKind::Other, "Internal error, please retry"),
                )
            }
        };
        (status, Json(ActionResponse { envelope })).into_response()
    }
}
