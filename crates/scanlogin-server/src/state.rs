//! Shared application state

use crate::config::ServerConfig;
use crate::qr::QrLoginRegistry;
use crate::sessions::SessionStore;
use crate::users::UserStore;
use crate::verification::VerificationCodes;

/// Everything the request handlers share
pub struct AppState {
    pub config: ServerConfig,
    pub users: UserStore,
    pub sessions: SessionStore,
    pub qr: QrLoginRegistry,
    pub verifications: VerificationCodes,
}

impl AppState {
    pub fn new(config: ServerConfig, users: UserStore) -> Self {
        Self {
            sessions: SessionStore::new(config.session_lifetime),
            qr: QrLoginRegistry::new(config.qr_lifetime),
            verifications: VerificationCodes::new(config.verification_lifetime),
            users,
            config,
        }
    }

    /// Open the user store named by the config
    pub async fn open(config: ServerConfig) -> Result<Self, crate::users::StoreError> {
        let users = match &config.users_path {
            Some(path) => UserStore::with_path(path.clone()).await?,
            None => UserStore::new().await?,
        };
        Ok(Self::new(config, users))
    }
}
