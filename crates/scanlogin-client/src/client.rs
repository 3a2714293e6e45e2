//! Identity service client
//!
//! Maps every reply onto the error taxonomy in [`scanlogin_core::Error`]:
//! transport failures and gateway errors are `NetworkFailure`, anything that
//! is not a 2xx JSON envelope of the expected shape is `BadResponse`, and a
//! `success: false` envelope is `Domain`.

use reqwest::{header, Response, StatusCode};
use scanlogin_core::protocol::{
    ActionResponse, CaptchaResponse, LoginRequest, LoginStatusResponse,
    QrCodeResponse, RegisterRequest, Reply, SendVerificationRequest, UserInfoResponse,
    UserProfile,
};
use scanlogin_core::{Error, LoginConfig, LoginSession, PollStatus, Result, StateToken};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Async client for the identity service endpoints
#[derive(Clone)]
pub struct IdentityClient {
    config: LoginConfig,
    http: reqwest::Client,
}

impl IdentityClient {
    /// Create a client with its own cookie jar
    pub fn new(config: LoginConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing)
    ///
    /// The client should have a cookie store enabled, or server-side
    /// sessions will not survive between calls.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    // ========================================================================
    // QR login
    // ========================================================================

    /// Request a new QR login session
    ///
    /// Every call yields an independent session with a fresh state token.
    pub async fn request_session(&self) -> Result<LoginSession> {
        const ENDPOINT: &str = "/wechat_qrcode";

        let reply: QrCodeResponse = self
            .get_json(ENDPOINT, self.config.endpoint("wechat_qrcode")?, "Failed to get QR code")
            .await?;

        let qr_ref = reply
            .qrcode_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::bad_response(ENDPOINT, "reply has no qrcode_url"))?;
        let qr_image_ref = self
            .config
            .base_url
            .join(qr_ref)
            .map_err(|e| Error::bad_response(ENDPOINT, format!("unusable qrcode_url: {}", e)))?;

        let state = reply
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::bad_response(ENDPOINT, "reply has no state token"))?;

        debug!("Issued QR login session {}", state);
        Ok(LoginSession::new(qr_image_ref, StateToken::new(state)))
    }

    /// Query the confirmation status of a state token
    pub async fn check_status(&self, token: &StateToken) -> Result<PollStatus> {
        const ENDPOINT: &str = "/check_wechat_login";

        let url = self.token_url("check_wechat_login/", token)?;
        let reply: LoginStatusResponse = self
            .get_json(ENDPOINT, url, "Failed to check login status")
            .await?;

        reply
            .poll_status()
            .ok_or_else(|| Error::bad_response(ENDPOINT, "reply has no status"))
    }

    /// Report that a device scanned the QR code (the mobile side of the flow)
    pub async fn report_scan(&self, token: &StateToken) -> Result<()> {
        let url = self.token_url("wechat_scan/", token)?;
        let _: ActionResponse = self
            .post_json("/wechat_scan", url, &(), "Failed to report scan")
            .await?;
        Ok(())
    }

    /// Approve a scanned QR code as the user signed in on this client
    /// (the mobile side of the flow)
    ///
    /// The service rejects the call with `NotAuthenticated` unless this
    /// client's session has signed in first.
    pub async fn confirm_scan(&self, token: &StateToken) -> Result<()> {
        let url = self.token_url("wechat_confirm/", token)?;
        let _: ActionResponse = self
            .post_json("/wechat_confirm", url, &(), "Failed to confirm login")
            .await?;
        Ok(())
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Rotate the captcha and return the URL of the new image
    pub async fn fetch_captcha(&self) -> Result<Url> {
        const ENDPOINT: &str = "/captcha";

        let reply: CaptchaResponse = self
            .get_json(ENDPOINT, self.config.endpoint("captcha")?, "Failed to refresh captcha")
            .await?;

        let captcha_ref = reply
            .captcha_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::bad_response(ENDPOINT, "reply has no captcha_url"))?;
        self.config
            .base_url
            .join(captcha_ref)
            .map_err(|e| Error::bad_response(ENDPOINT, format!("unusable captcha_url: {}", e)))
    }

    /// Submit username, password and captcha
    pub async fn login(&self, request: &LoginRequest) -> Result<()> {
        let _: ActionResponse = self
            .post_json(
                "/login",
                self.config.endpoint("login")?,
                request,
                "Login failed, please retry",
            )
            .await?;
        Ok(())
    }

    /// Create an account
    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        let _: ActionResponse = self
            .post_json(
                "/register",
                self.config.endpoint("register")?,
                request,
                "Registration failed, please retry",
            )
            .await?;
        Ok(())
    }

    /// Ask the service to e-mail a verification code
    pub async fn send_verification(&self, email: &str) -> Result<()> {
        let body = SendVerificationRequest {
            email: email.to_string(),
        };
        let _: ActionResponse = self
            .post_json(
                "/send_verification",
                self.config.endpoint("send_verification")?,
                &body,
                "Failed to send verification code",
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Fetch the signed-in user; `None` means the caller should go to login
    pub async fn user_info(&self) -> Result<Option<UserProfile>> {
        const ENDPOINT: &str = "/user_info";

        let response = self
            .http
            .get(self.config.endpoint("user_info")?)
            .send()
            .await
            .map_err(|e| Error::network(ENDPOINT, e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        match decode::<UserInfoResponse>(ENDPOINT, response, "Not signed in").await {
            Ok(reply) => Ok(reply.user),
            Err(Error::Domain(failure)) => {
                debug!("No signed-in user: {}", failure);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the server-side session
    pub async fn logout(&self) -> Result<()> {
        let _: ActionResponse = self
            .post_json("/logout", self.config.endpoint("logout")?, &(), "Logout failed")
            .await?;
        Ok(())
    }

    // ========================================================================
    // Transport helpers
    // ========================================================================

    fn token_url(&self, prefix: &str, token: &StateToken) -> Result<Url> {
        let mut url = self.config.endpoint(prefix)?;
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!("base URL cannot be a base: {}", self.config.base_url))
            })?
            .pop_if_empty()
            .push(token.as_str());
        Ok(url)
    }

    async fn get_json<T>(&self, endpoint: &'static str, url: Url, fallback: &str) -> Result<T>
    where
        T: DeserializeOwned + Reply,
    {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(endpoint, e.to_string()))?;
        decode(endpoint, response, fallback).await
    }

    async fn post_json<B, T>(
        &self,
        endpoint: &'static str,
        url: Url,
        body: &B,
        fallback: &str,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Reply,
    {
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::network(endpoint, e.to_string()))?;
        decode(endpoint, response, fallback).await
    }
}

/// Turn an HTTP response into a typed reply or a classified error
async fn decode<T>(endpoint: &'static str, response: Response, fallback: &str) -> Result<T>
where
    T: DeserializeOwned + Reply,
{
    let status = response.status();
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        return Err(Error::network(endpoint, format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(Error::bad_response(endpoint, format!("HTTP {}", status)));
    }

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));

    let body = response
        .text()
        .await
        .map_err(|e| Error::network(endpoint, e.to_string()))?;

    if !is_json {
        let preview: String = body.chars().take(100).collect();
        return Err(Error::bad_response(
            endpoint,
            format!("response is not JSON: {}", preview),
        ));
    }

    let reply: T = serde_json::from_str(&body)
        .map_err(|e| Error::bad_response(endpoint, format!("unexpected reply shape: {}", e)))?;

    if let Some(failure) = reply.envelope().to_failure(fallback) {
        return Err(failure.into());
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> IdentityClient {
        IdentityClient::new(
            LoginConfig::new().with_base_url("http://localhost:5000/api".parse().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_token_url_escapes_token() {
        let client = test_client();
        let url = client
            .token_url("check_wechat_login/", &StateToken::new("a b/c"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/check_wechat_login/a%20b%2Fc"
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = LoginConfig::new().with_request_timeout(std::time::Duration::ZERO);
        assert!(matches!(IdentityClient::new(config), Err(Error::Config(_))));
    }
}
