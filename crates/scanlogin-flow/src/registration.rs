//! Registration form with e-mail verification

use crate::navigation::Navigation;
use crate::service::AccountService;
use scanlogin_core::protocol::RegisterRequest;
use scanlogin_core::{Error, LoginConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Minimum gap between two verification e-mails
#[derive(Debug, Clone)]
pub struct ResendCooldown {
    period: Duration,
    started: Option<Instant>,
}

impl ResendCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            started: None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    /// Time left before another code may be sent
    pub fn remaining(&self) -> Duration {
        self.started
            .map(|at| self.period.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_active(&self) -> bool {
        !self.remaining().is_zero()
    }
}

/// State of the registration form
pub struct Registration<S: AccountService> {
    service: Arc<S>,
    cooldown: ResendCooldown,
    landing_route: String,
    navigation_delay: Duration,
}

impl<S: AccountService> Registration<S> {
    pub fn new(service: Arc<S>, config: &LoginConfig) -> Self {
        Self {
            service,
            cooldown: ResendCooldown::new(config.resend_cooldown),
            landing_route: config.landing_route.clone(),
            navigation_delay: config.navigation_delay,
        }
    }

    pub fn cooldown(&self) -> &ResendCooldown {
        &self.cooldown
    }

    /// Ask the service to e-mail a verification code
    ///
    /// The cooldown starts as soon as the request is sent and is cleared
    /// again if sending fails, so the user can retry right away.
    pub async fn send_code(&mut self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::Validation("Please enter an e-mail address".to_string()));
        }
        if self.cooldown.is_active() {
            return Err(Error::Validation(format!(
                "Please wait {} s before requesting another code",
                self.cooldown.remaining().as_secs().max(1)
            )));
        }

        self.cooldown.start();
        match self.service.send_verification(email).await {
            Ok(()) => {
                info!("Verification code sent to {}", email);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send verification code: {}", e);
                self.cooldown.reset();
                Err(e)
            }
        }
    }

    /// Submit the form; passwords are checked locally before any call
    pub async fn submit(&mut self, request: &RegisterRequest) -> Result<Navigation> {
        if request.username.trim().is_empty() || request.email.trim().is_empty() {
            return Err(Error::Validation(
                "Please enter username and e-mail".to_string(),
            ));
        }
        if request.password.is_empty() {
            return Err(Error::Validation("Please enter a password".to_string()));
        }
        if request.password != request.confirm_password {
            return Err(Error::Validation("Passwords do not match".to_string()));
        }

        self.service.register(request).await?;
        info!("Registered {}", request.username);
        Ok(Navigation::new(
            self.landing_route.clone(),
            self.navigation_delay,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use scanlogin_core::{DomainFailure, DomainFailureKind};

    fn request(password: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            email: "alice@example.com".into(),
            verification_code: "123456".into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
    }

    #[tokio::test]
    async fn test_password_mismatch_rejected_before_call() {
        let service = Arc::new(ScriptedService::new());
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        let err = form.submit(&request("one", "two")).await.unwrap_err();
        assert_eq!(err, Error::Validation("Passwords do not match".into()));
        assert_eq!(service.calls("register"), 0);
    }

    #[tokio::test]
    async fn test_success_navigates_after_delay() {
        let service = Arc::new(ScriptedService::new());
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        let nav = form.submit(&request("pw", "pw")).await.unwrap();
        assert_eq!(nav.route, "/");
        assert_eq!(nav.delay, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_domain_failure_is_verbatim() {
        let service = Arc::new(ScriptedService::new());
        service.respond(
            "register",
            Err(DomainFailure::new(DomainFailureKind::AlreadyRegistered, "Email already used").into()),
        );
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        let err = form.submit(&request("pw", "pw")).await.unwrap_err();
        assert_eq!(err.to_string(), "Email already used");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_resend() {
        let service = Arc::new(ScriptedService::new());
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        form.send_code("alice@example.com").await.unwrap();
        assert!(form.cooldown().is_active());
        assert!(matches!(
            form.send_code("alice@example.com").await,
            Err(Error::Validation(_))
        ));
        assert_eq!(service.calls("send_verification"), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!form.cooldown().is_active());
        form.send_code("alice@example.com").await.unwrap();
        assert_eq!(service.calls("send_verification"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_resets_cooldown() {
        let service = Arc::new(ScriptedService::new());
        service.respond(
            "send_verification",
            Err(Error::network("/send_verification", "timed out")),
        );
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        assert!(form.send_code("alice@example.com").await.is_err());
        assert!(!form.cooldown().is_active());
        form.send_code("alice@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_email_rejected() {
        let service = Arc::new(ScriptedService::new());
        let mut form = Registration::new(service.clone(), &LoginConfig::default());

        assert!(matches!(form.send_code(" ").await, Err(Error::Validation(_))));
        assert_eq!(service.calls("send_verification"), 0);
    }
}
