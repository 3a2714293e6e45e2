//! Username/password/captcha login form

use crate::navigation::Navigation;
use crate::service::AccountService;
use scanlogin_core::protocol::LoginRequest;
use scanlogin_core::{Error, LoginConfig, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// State of the credential login form
///
/// Captcha codes are single use on the service side, so the image is
/// replaced after every rejected attempt.
pub struct CredentialLogin<S: AccountService> {
    service: Arc<S>,
    captcha_url: Option<Url>,
    landing_route: String,
}

impl<S: AccountService> CredentialLogin<S> {
    pub fn new(service: Arc<S>, config: &LoginConfig) -> Self {
        Self {
            service,
            captcha_url: None,
            landing_route: config.landing_route.clone(),
        }
    }

    /// Load the form: fetch the first captcha
    pub async fn open(service: Arc<S>, config: &LoginConfig) -> Result<Self> {
        let mut form = Self::new(service, config);
        form.refresh_captcha().await?;
        Ok(form)
    }

    /// Image URL of the current captcha
    pub fn captcha_url(&self) -> Option<&Url> {
        self.captcha_url.as_ref()
    }

    /// Rotate the captcha
    pub async fn refresh_captcha(&mut self) -> Result<&Url> {
        let url = self.service.fetch_captcha().await?;
        Ok(&*self.captcha_url.insert(url))
    }

    /// Submit the form
    ///
    /// A rejection by the service refreshes the captcha before the error is
    /// returned; transient failures keep the current one.
    pub async fn submit(
        &mut self,
        username: &str,
        password: &str,
        captcha: &str,
    ) -> Result<Navigation> {
        let username = username.trim();
        let captcha = captcha.trim();
        if username.is_empty() || password.is_empty() || captcha.is_empty() {
            return Err(Error::Validation(
                "Please enter username, password and captcha".to_string(),
            ));
        }

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            captcha: captcha.to_string(),
        };

        match self.service.login(&request).await {
            Ok(()) => {
                info!("Signed in as {}", username);
                Ok(Navigation::immediate(self.landing_route.clone()))
            }
            Err(Error::Domain(failure)) => {
                if let Err(e) = self.refresh_captcha().await {
                    warn!("Failed to refresh captcha: {}", e);
                }
                Err(Error::Domain(failure))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use scanlogin_core::{DomainFailure, DomainFailureKind};

    async fn open_form(service: &Arc<ScriptedService>) -> CredentialLogin<ScriptedService> {
        CredentialLogin::open(service.clone(), &LoginConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_fetches_captcha() {
        let service = Arc::new(ScriptedService::new());
        let form = open_form(&service).await;

        assert_eq!(service.calls("fetch_captcha"), 1);
        assert!(form.captcha_url().is_some());
    }

    #[tokio::test]
    async fn test_success_navigates_to_landing_route() {
        let service = Arc::new(ScriptedService::new());
        let mut form = open_form(&service).await;

        let nav = form.submit("alice", "s3cret", "AB12").await.unwrap();
        assert_eq!(nav, Navigation::immediate("/"));
        assert_eq!(service.calls("login"), 1);
    }

    #[tokio::test]
    async fn test_empty_fields_rejected_locally() {
        let service = Arc::new(ScriptedService::new());
        let mut form = open_form(&service).await;

        let err = form.submit("alice", "s3cret", "  ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(service.calls("login"), 0);
    }

    #[tokio::test]
    async fn test_rejection_refreshes_captcha() {
        let service = Arc::new(ScriptedService::new());
        service.respond(
            "login",
            Err(DomainFailure::new(DomainFailureKind::CaptchaMismatch, "Wrong captcha").into()),
        );
        let mut form = open_form(&service).await;
        let before = form.captcha_url().cloned();

        let err = form.submit("alice", "s3cret", "ZZZZ").await.unwrap_err();
        assert_eq!(err.to_string(), "Wrong captcha");
        assert_eq!(service.calls("fetch_captcha"), 2);
        assert_ne!(form.captcha_url().cloned(), before);
    }

    #[tokio::test]
    async fn test_network_failure_keeps_captcha() {
        let service = Arc::new(ScriptedService::new());
        service.respond("login", Err(Error::network("/login", "connection reset")));
        let mut form = open_form(&service).await;

        let err = form.submit("alice", "s3cret", "AB12").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(service.calls("fetch_captcha"), 1);

        // Still retryable
        assert!(form.submit("alice", "s3cret", "AB12").await.is_ok());
    }
}
