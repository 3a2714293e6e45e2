//! Seams between the flows and the identity service
//!
//! The flows only talk to these traits, so timers and the state machine can
//! be driven by scripted services in tests.

use scanlogin_client::IdentityClient;
use scanlogin_core::protocol::{LoginRequest, RegisterRequest};
use scanlogin_core::{LoginSession, PollStatus, Result, StateToken};
use std::future::Future;
use url::Url;

/// QR session issuing and status queries
pub trait IdentityService: Send + Sync + 'static {
    /// Request a new login session (QR image reference + state token)
    fn request_session(&self) -> impl Future<Output = Result<LoginSession>> + Send;

    /// Query the confirmation status of `token`
    fn check_status(&self, token: &StateToken) -> impl Future<Output = Result<PollStatus>> + Send;
}

/// Credential login and registration calls
pub trait AccountService: Send + Sync + 'static {
    fn fetch_captcha(&self) -> impl Future<Output = Result<Url>> + Send;

    fn login(&self, request: &LoginRequest) -> impl Future<Output = Result<()>> + Send;

    fn send_verification(&self, email: &str) -> impl Future<Output = Result<()>> + Send;

    fn register(&self, request: &RegisterRequest) -> impl Future<Output = Result<()>> + Send;
}

impl IdentityService for IdentityClient {
    async fn request_session(&self) -> Result<LoginSession> {
        IdentityClient::request_session(self).await
    }

    async fn check_status(&self, token: &StateToken) -> Result<PollStatus> {
        IdentityClient::check_status(self, token).await
    }
}

impl AccountService for IdentityClient {
    async fn fetch_captcha(&self) -> Result<Url> {
        IdentityClient::fetch_captcha(self).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<()> {
        IdentityClient::login(self, request).await
    }

    async fn send_verification(&self, email: &str) -> Result<()> {
        IdentityClient::send_verification(self, email).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<()> {
        IdentityClient::register(self, request).await
    }
}
