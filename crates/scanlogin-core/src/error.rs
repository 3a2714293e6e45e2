//! Error types for scanlogin

use thiserror::Error;

/// Main error type for scanlogin operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transport-level failure: no usable response arrived
    #[error("Network failure calling {endpoint}: {message}")]
    NetworkFailure { endpoint: String, message: String },

    /// A response arrived but was malformed, non-JSON or of the wrong shape
    #[error("Bad response from {endpoint}: {message}")]
    BadResponse { endpoint: String, message: String },

    /// The service answered `success: false`
    #[error(transparent)]
    Domain(#[from] DomainFailure),

    /// A form was rejected locally before any call was made
    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using scanlogin's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a network failure error
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NetworkFailure {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a bad response error
    pub fn bad_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BadResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Transport and shape failures; safe to retry without user involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkFailure { .. } | Error::BadResponse { .. })
    }

    /// The domain failure, if the service rejected the request
    pub fn domain(&self) -> Option<&DomainFailure> {
        match self {
            Error::Domain(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Category of a `success: false` reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DomainFailureKind {
    InvalidCredentials,
    CaptchaMismatch,
    QrExpired,
    AlreadyRegistered,
    InvalidVerificationCode,
    NotAuthenticated,
    #[default]
    Other,
}

impl DomainFailureKind {
    /// Wire code carried in the `code` field of a failure envelope
    pub fn as_code(&self) -> &'static str {
        match self {
            DomainFailureKind::InvalidCredentials => "invalid_credentials",
            DomainFailureKind::CaptchaMismatch => "captcha_mismatch",
            DomainFailureKind::QrExpired => "qr_expired",
            DomainFailureKind::AlreadyRegistered => "already_registered",
            DomainFailureKind::InvalidVerificationCode => "invalid_verification_code",
            DomainFailureKind::NotAuthenticated => "not_authenticated",
            DomainFailureKind::Other => "other",
        }
    }

    /// Parse a wire code; unknown codes are `Other`
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_credentials" => DomainFailureKind::InvalidCredentials,
            "captcha_mismatch" => DomainFailureKind::CaptchaMismatch,
            "qr_expired" => DomainFailureKind::QrExpired,
            "already_registered" => DomainFailureKind::AlreadyRegistered,
            "invalid_verification_code" => DomainFailureKind::InvalidVerificationCode,
            "not_authenticated" => DomainFailureKind::NotAuthenticated,
            _ => DomainFailureKind::Other,
        }
    }
}

/// A rejection reported by the identity service, shown to the user verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DomainFailure {
    pub kind: DomainFailureKind,
    pub message: String,
}

impl DomainFailure {
    pub fn new(kind: DomainFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
