//! Persistent user accounts
//!
//! Uses JSON file storage in ~/.config/scanlogin/users.json

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use scanlogin_core::protocol::UserProfile;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Username already exists")]
    UsernameTaken,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Configuration directory not found")]
    NoConfigDir,
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Base64 SHA-256 of salt + password
    pub password_hash: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    fn new(username: &str, email: &str, password: &str) -> Self {
        let salt = generate_salt();
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            created_at: Utc::now(),
        }
    }

    /// Compares hashes in constant time
    pub fn verify_password(&self, password: &str) -> bool {
        let candidate = hash_password(&self.salt, password);
        bool::from(candidate.as_bytes().ct_eq(self.password_hash.as_bytes()))
    }

    /// Public view of the account
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.to_string(),
            username: self.username.clone(),
            email: Some(self.email.clone()),
            display_name: None,
            created_at: Some(self.created_at.to_rfc3339()),
        }
    }
}

fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    BASE64.encode(bytes)
}

/// Hash a password with its salt for storage
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    /// Users indexed by ID
    users: HashMap<Uuid, User>,
}

/// User storage with optional file persistence
pub struct UserStore {
    /// Path to the storage file; `None` keeps everything in memory
    path: Option<PathBuf>,
    data: RwLock<StoredData>,
}

impl UserStore {
    /// Open the store at the default location
    pub async fn new() -> StoreResult<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Open the store at a specific path, loading existing data if present
    pub async fn with_path(path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded user store from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse user store, starting fresh: {}", e);
                    StoredData::default()
                }
            }
        } else {
            debug!("No existing user store, creating new");
            StoredData::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StoredData::default()),
        }
    }

    /// Default storage path (~/.config/scanlogin/users.json)
    pub fn default_path() -> StoreResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(config_dir.join("scanlogin").join("users.json"))
    }

    async fn save(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(path, json)?;
        debug!("Saved user store to {:?}", path);
        Ok(())
    }

    /// Create an account; username and e-mail must both be unused
    pub async fn create(&self, username: &str, email: &str, password: &str) -> StoreResult<User> {
        let user = {
            let mut data = self.data.write().await;
            if data.users.values().any(|u| u.username == username) {
                return Err(StoreError::UsernameTaken);
            }
            if data.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
                return Err(StoreError::EmailTaken);
            }
            let user = User::new(username, email, password);
            data.users.insert(user.id, user.clone());
            user
        };
        self.save().await?;
        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn get(&self, id: &Uuid) -> Option<User> {
        self.data.read().await.users.get(id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        let data = self.data.read().await;
        data.users.values().find(|u| u.username == username).cloned()
    }

    pub async fn username_taken(&self, username: &str) -> bool {
        self.find_by_username(username).await.is_some()
    }

    pub async fn email_registered(&self, email: &str) -> bool {
        let data = self.data.read().await;
        data.users.values().any(|u| u.email.eq_ignore_ascii_case(email))
    }

    /// The account for `username` if `password` matches
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        self.find_by_username(username)
            .await
            .filter(|u| u.verify_password(password))
    }

    pub async fn count(&self) -> usize {
        self.data.read().await.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let store = UserStore::in_memory();
        let user = store.create("alice", "alice@example.com", "s3cret").await.unwrap();

        assert_ne!(user.password_hash, "s3cret");
        assert!(store.authenticate("alice", "s3cret").await.is_some());
        assert!(store.authenticate("alice", "wrong").await.is_none());
        assert!(store.authenticate("bob", "s3cret").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let store = UserStore::in_memory();
        store.create("alice", "alice@example.com", "pw").await.unwrap();

        assert!(matches!(
            store.create("alice", "other@example.com", "pw").await,
            Err(StoreError::UsernameTaken)
        ));
        assert!(matches!(
            store.create("bob", "Alice@Example.com", "pw").await,
            Err(StoreError::EmailTaken)
        ));
        assert_eq!(store.count().await, 1);
    }

    #[test]
    fn test_salted_hashes_differ() {
        let a = User::new("a", "a@example.com", "same");
        let b = User::new("b", "b@example.com", "same");
        assert_ne!(a.password_hash, b.password_hash);
        assert!(a.verify_password("same"));
    }

    #[test]
    fn test_verify_password_rejects_near_misses() {
        let mut user = User::new("a", "a@example.com", "hunter2");
        assert!(user.verify_password("hunter2"));
        assert!(!user.verify_password("hunter3"));
        assert!(!user.verify_password(""));

        // A stored hash of another length never matches
        user.password_hash.truncate(8);
        assert!(!user.verify_password("hunter2"));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("users.json");

        let id = {
            let store = UserStore::with_path(path.clone()).await.unwrap();
            store.create("alice", "alice@example.com", "pw").await.unwrap().id
        };

        let reopened = UserStore::with_path(path).await.unwrap();
        let user = reopened.get(&id).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(reopened.authenticate("alice", "pw").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();

        let store = UserStore::with_path(path).await.unwrap();
        assert_eq!(store.count().await, 0);
    }
}
