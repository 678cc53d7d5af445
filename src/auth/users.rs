//! JSON-file user store.
//!
//! File layout:
//! ```text
//! {"access_enabled": false,
//!  "users": [{"username": "an", "password_hash": "$2b$12$<bcrypt>",
//!             "enabled": true, "created_at": "2025-01-01T00:00:00Z"}]}
//! ```
//! Passwords are bcrypt hashes. Entries written by older releases as
//! `sha256$<salt>$<digest>` still verify.
//!
//! Writes go through a temp file and a rename, and keep the previous file as
//! `<file>.bak`. A corrupt file is restored from that backup on open. Every
//! method does blocking file I/O or hashing; async callers run them on the
//! blocking pool.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use super::session::SessionStore;
use super::CredentialStore;

/// Bcrypt work factor for new hashes.
pub const DEFAULT_HASH_COST: u32 = bcrypt::DEFAULT_COST;

const LEGACY_SCHEME: &str = "sha256";

/// Errors from user store operations
#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error("User '{0}' already exists")]
    Duplicate(String),

    #[error("User '{0}' not found")]
    NotFound(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Password must be at least {0} characters long")]
    PasswordTooShort(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// A stored user. The password is only kept as a salted hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Listing entry without the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub username: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserSummary {
    fn from(record: &UserRecord) -> Self {
        Self {
            username: record.username.clone(),
            enabled: record.enabled,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct UserFile {
    #[serde(default)]
    access_enabled: bool,
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// User accounts and the access-control switch, persisted as JSON.
pub struct UserStore {
    path: PathBuf,
    min_password_len: usize,
    hash_cost: u32,
    data: RwLock<UserFile>,
    sessions: Option<Arc<SessionStore>>,
}

impl UserStore {
    /// Open the store at `path`, creating it with defaults when missing.
    pub fn open(path: impl AsRef<Path>, min_password_len: usize) -> Result<Self, UserStoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            load_or_recover(&path)?
        } else {
            info!(path = %path.display(), "No users file found, creating one");
            let data = UserFile::default();
            write_atomic(&path, &data)?;
            data
        };

        info!(users = data.users.len(), access_enabled = data.access_enabled, "User store loaded");
        Ok(Self {
            path,
            min_password_len,
            hash_cost: DEFAULT_HASH_COST,
            data: RwLock::new(data),
            sessions: None,
        })
    }

    /// Bcrypt cost for passwords added from now on.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Revoke sessions through `sessions` when a user is removed or disabled.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_access_enabled(&self) -> bool {
        self.data.read().access_enabled
    }

    pub fn set_access_enabled(&self, enabled: bool) -> Result<(), UserStoreError> {
        self.mutate(|data| {
            data.access_enabled = enabled;
            Ok(())
        })?;
        info!(enabled, "Access control updated");
        Ok(())
    }

    pub fn list(&self) -> Vec<UserSummary> {
        self.data.read().users.iter().map(UserSummary::from).collect()
    }

    pub fn get(&self, username: &str) -> Option<UserSummary> {
        self.data
            .read()
            .users
            .iter()
            .find(|u| u.username == username)
            .map(UserSummary::from)
    }

    pub fn add(&self, username: &str, password: &str) -> Result<(), UserStoreError> {
        let username = username.trim();
        validate_username(username)?;
        if password.chars().count() < self.min_password_len {
            return Err(UserStoreError::PasswordTooShort(self.min_password_len));
        }

        let record = UserRecord {
            username: username.to_string(),
            password_hash: hash_password_with_cost(password, self.hash_cost)?,
            enabled: true,
            created_at: Utc::now(),
        };
        self.mutate(|data| {
            if data.users.iter().any(|u| u.username == record.username) {
                return Err(UserStoreError::Duplicate(record.username.clone()));
            }
            data.users.push(record.clone());
            Ok(())
        })?;
        info!(username, "User added");
        Ok(())
    }

    pub fn remove(&self, username: &str) -> Result<(), UserStoreError> {
        self.mutate(|data| {
            let before = data.users.len();
            data.users.retain(|u| u.username != username);
            if data.users.len() == before {
                return Err(UserStoreError::NotFound(username.to_string()));
            }
            Ok(())
        })?;
        self.revoke_sessions(username);
        info!(username, "User removed");
        Ok(())
    }

    pub fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), UserStoreError> {
        self.mutate(|data| {
            let user = data
                .users
                .iter_mut()
                .find(|u| u.username == username)
                .ok_or_else(|| UserStoreError::NotFound(username.to_string()))?;
            user.enabled = enabled;
            Ok(())
        })?;
        if !enabled {
            self.revoke_sessions(username);
        }
        info!(username, enabled, "User status updated");
        Ok(())
    }

    /// Check credentials. Unknown and disabled users never verify.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.data
            .read()
            .users
            .iter()
            .find(|u| u.username == username)
            .is_some_and(|u| u.enabled && verify_password(password, &u.password_hash))
    }

    fn revoke_sessions(&self, username: &str) {
        if let Some(sessions) = &self.sessions {
            sessions.invalidate_all(username);
        }
    }

    /// Apply `change` to a copy, persist it, then publish it.
    fn mutate<F>(&self, change: F) -> Result<(), UserStoreError>
    where
        F: FnOnce(&mut UserFile) -> Result<(), UserStoreError>,
    {
        let mut data = self.data.write();
        let mut next = data.clone();
        change(&mut next)?;
        write_atomic(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

impl CredentialStore for UserStore {
    fn verify(&self, identity: &str, secret: &str) -> bool {
        UserStore::verify(self, identity, secret)
    }

    fn is_enabled(&self, identity: &str) -> bool {
        self.get(identity).is_some_and(|u| u.enabled)
    }
}

fn validate_username(username: &str) -> Result<(), UserStoreError> {
    if username.is_empty() {
        return Err(UserStoreError::InvalidUsername("username is empty".to_string()));
    }
    if username.chars().count() > 64 {
        return Err(UserStoreError::InvalidUsername("username is longer than 64 characters".to_string()));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(UserStoreError::InvalidUsername(format!(
            "'{username}' may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn load_or_recover(path: &Path) -> Result<UserFile, UserStoreError> {
    let err = match fs::read_to_string(path).map_err(UserStoreError::from).and_then(|raw| {
        serde_json::from_str::<UserFile>(&raw).map_err(UserStoreError::from)
    }) {
        Ok(data) => return Ok(data),
        Err(err) => err,
    };

    let backup = backup_path(path);
    warn!(path = %path.display(), error = %err, "Users file unreadable, attempting recovery");
    let recovered = fs::read_to_string(&backup)
        .ok()
        .and_then(|raw| serde_json::from_str::<UserFile>(&raw).ok());

    let data = match recovered {
        Some(data) => {
            info!(backup = %backup.display(), "Users restored from backup");
            data
        }
        None => {
            warn!("No usable backup, starting with an empty user list");
            UserFile::default()
        }
    };
    fs::write(path, serde_json::to_string_pretty(&data)?)?;
    Ok(data)
}

fn write_atomic(path: &Path, data: &UserFile) -> Result<(), UserStoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        if let Err(e) = fs::copy(path, backup_path(path)) {
            warn!(error = %e, "Failed to back up users file");
        }
    }

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_string_pretty(data)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Bcrypt hash of `password` at [`DEFAULT_HASH_COST`].
pub fn hash_password(password: &str) -> Result<String, UserStoreError> {
    hash_password_with_cost(password, DEFAULT_HASH_COST)
}

pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, UserStoreError> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Check `password` against a stored hash, bcrypt or legacy salted SHA-256.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.starts_with("$2") {
        return bcrypt::verify(password, stored).unwrap_or(false);
    }

    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(LEGACY_SCHEME), Some(salt), Some(expected)) => {
            legacy_digest(salt, password).as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}

fn legacy_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
