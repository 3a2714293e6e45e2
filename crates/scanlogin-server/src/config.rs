//! Demo identity service configuration

use chrono::Duration;
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

/// Default port, matching the default client base URL
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: SocketAddr,
    /// Externally reachable base URL used in QR confirm links
    pub public_url: Option<Url>,
    /// Lifetime of a QR login session
    pub qr_lifetime: Duration,
    /// Lifetime of a captcha code
    pub captcha_lifetime: Duration,
    /// Lifetime of an e-mail verification code
    pub verification_lifetime: Duration,
    /// Idle time after which a browser session ends
    pub session_lifetime: Duration,
    /// User store location; `None` uses the config directory
    pub users_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            public_url: None,
            qr_lifetime: Duration::seconds(300),
            captcha_lifetime: Duration::seconds(300),
            verification_lifetime: Duration::minutes(10),
            session_lifetime: Duration::hours(24),
            users_path: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_public_url(mut self, url: Url) -> Self {
        self.public_url = Some(url);
        self
    }

    pub fn with_qr_lifetime(mut self, lifetime: Duration) -> Self {
        self.qr_lifetime = lifetime;
        self
    }

    pub fn with_captcha_lifetime(mut self, lifetime: Duration) -> Self {
        self.captcha_lifetime = lifetime;
        self
    }

    pub fn with_verification_lifetime(mut self, lifetime: Duration) -> Self {
        self.verification_lifetime = lifetime;
        self
    }

    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    pub fn with_users_path(mut self, path: PathBuf) -> Self {
        self.users_path = Some(path);
        self
    }

    /// Base URL that links handed to devices are built on
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }
}
