//! Configuration types for scanlogin

use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Default identity service endpoint
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/api/";

/// Main configuration for the login client and flows
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Base URL every endpoint is resolved against
    pub base_url: Url,
    /// Poll interval while waiting for the QR code to be scanned
    pub scan_poll_interval: Duration,
    /// Poll interval once scanned, while waiting for confirmation
    pub confirm_poll_interval: Duration,
    /// Hard lifetime of one QR login session
    pub session_lifetime: Duration,
    /// Delay between showing success and navigating away
    pub navigation_delay: Duration,
    /// Minimum gap between two verification e-mails
    pub resend_cooldown: Duration,
    /// Per-request timeout for the HTTP client
    pub request_timeout: Duration,
    /// Route navigated to after a successful login
    pub landing_route: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.parse().expect("valid default URL"),
            scan_poll_interval: Duration::from_millis(2000),
            confirm_poll_interval: Duration::from_millis(1000),
            session_lifetime: Duration::from_millis(300_000),
            navigation_delay: Duration::from_millis(1500),
            resend_cooldown: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            landing_route: "/".to_string(),
        }
    }
}

impl LoginConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set the service base URL
    ///
    /// A missing trailing slash is added so relative joins keep the last
    /// path segment (`/api` + `login` -> `/api/login`).
    pub fn with_base_url(mut self, mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = url;
        self
    }

    /// Builder pattern: set both poll intervals
    pub fn with_poll_intervals(mut self, scanning: Duration, scanned: Duration) -> Self {
        self.scan_poll_interval = scanning;
        self.confirm_poll_interval = scanned;
        self
    }

    /// Builder pattern: set the QR session lifetime
    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    /// Builder pattern: set the post-login display delay
    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    /// Builder pattern: set the verification resend cooldown
    pub fn with_resend_cooldown(mut self, cooldown: Duration) -> Self {
        self.resend_cooldown = cooldown;
        self
    }

    /// Builder pattern: set the HTTP request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder pattern: set the landing route
    pub fn with_landing_route(mut self, route: impl Into<String>) -> Self {
        self.landing_route = route.into();
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL must be http or https, got {}",
                self.base_url
            )));
        }

        let durations = [
            ("scan poll interval", self.scan_poll_interval),
            ("confirm poll interval", self.confirm_poll_interval),
            ("session lifetime", self.session_lifetime),
            ("request timeout", self.request_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }

        Ok(())
    }

    /// Resolve an endpoint path or a server-provided reference against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {}", path, e)))
    }
}
