//! In-memory session store with fixed-lifetime tokens.
//!
//! Token format: `vxs_{43 alphanumeric chars}`. A session is valid for a fixed
//! period measured from its creation; validating it refreshes
//! `last_activity` but never extends its life.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Token prefix for session tokens.
pub const SESSION_TOKEN_PREFIX: &str = "vxs_";

/// Length of the random portion of a token (about 256 bits).
const TOKEN_RANDOM_LENGTH: usize = 43;

/// Default session lifetime.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Role a session was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub identity: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.token.get(..SESSION_TOKEN_PREFIX.len() + 4).unwrap_or("");
        f.debug_struct("Session")
            .field("token", &format_args!("{shown}…"))
            .field("identity", &self.identity)
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Token table shared by the control plane and the request path.
///
/// Every operation, including `validate`, takes the same exclusive lock; the
/// lock is held only for the map access itself.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timeout: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    pub fn from_hours(hours: u64) -> Self {
        Self::new(Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.to_std().unwrap_or(Duration::MAX)
    }

    /// Start a session for an identity whose credentials were already checked.
    pub fn create(&self, identity: &str, role: Role) -> String {
        let token = generate_token();
        let now = self.clock.now();
        let session = Session {
            token: token.clone(),
            identity: identity.to_string(),
            role,
            created_at: now,
            last_activity: now,
        };
        self.sessions.lock().insert(token.clone(), session);
        info!(identity, %role, "Session created");
        token
    }

    /// Look up a live session, refreshing its last activity.
    ///
    /// Unknown and expired tokens are indistinguishable to the caller; expired
    /// entries are evicted.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(token)?;

        if self.is_expired(session, now) {
            let identity = session.identity.clone();
            sessions.remove(token);
            debug!(identity = %identity, "Session expired");
            return None;
        }

        session.last_activity = now;
        Some(session.clone())
    }

    /// Role of a live session.
    pub fn role_of(&self, token: &str) -> Option<Role> {
        self.validate(token).map(|s| s.role)
    }

    /// Remove one session. Unknown tokens are ignored.
    pub fn invalidate(&self, token: &str) {
        if let Some(session) = self.sessions.lock().remove(token) {
            debug!(identity = %session.identity, "Session invalidated");
        }
    }

    /// Remove every session belonging to `identity`. Returns how many.
    pub fn invalidate_all(&self, identity: &str) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.identity != identity);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(identity, removed, "Sessions revoked");
        }
        removed
    }

    /// Remove every expired session. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Swept expired sessions");
        }
        removed
    }

    /// Number of stored sessions, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.created_at) >= self.timeout
    }
}

fn generate_token() -> String {
    let random_part: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_RANDOM_LENGTH)
        .map(char::from)
        .collect();
    format!("{SESSION_TOKEN_PREFIX}{random_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(timeout: Duration) -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (SessionStore::with_clock(timeout, clock.clone()), clock)
    }

    #[test]
    fn tokens_are_prefixed_and_unique() {
        let (store, _) = store(DEFAULT_SESSION_TIMEOUT);
        let a = store.create("alice", Role::User);
        let b = store.create("alice", Role::User);
        assert!(a.starts_with(SESSION_TOKEN_PREFIX));
        assert_eq!(a.len(), SESSION_TOKEN_PREFIX.len() + TOKEN_RANDOM_LENGTH);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn validate_refreshes_activity_but_not_lifetime() {
        let (store, clock) = store(Duration::from_secs(60));
        let token = store.create("alice", Role::Admin);

        clock.advance(Duration::from_secs(30));
        let session = store.validate(&token).expect("still valid");
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.last_activity - session.created_at, chrono::Duration::seconds(30));

        clock.advance(Duration::from_secs(30));
        assert!(store.validate(&token).is_none());
        assert!(store.is_empty(), "expired session is evicted");
    }

    #[test]
    fn unknown_token_is_absent() {
        let (store, _) = store(DEFAULT_SESSION_TIMEOUT);
        assert!(store.validate("vxs_nope").is_none());
        assert!(store.role_of("").is_none());
    }

    #[test]
    fn invalidate_is_idempotent() {
        let (store, _) = store(DEFAULT_SESSION_TIMEOUT);
        let token = store.create("bob", Role::User);
        store.invalidate(&token);
        store.invalidate(&token);
        assert!(store.validate(&token).is_none());
    }

    #[test]
    fn sweep_removes_only_expired_sessions() {
        let (store, clock) = store(Duration::from_secs(10));
        store.create("old", Role::User);
        clock.advance(Duration::from_secs(6));
        let fresh = store.create("new", Role::User);
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.validate(&fresh).map(|s| s.identity), Some("new".to_string()));
    }

    #[test]
    fn debug_output_does_not_leak_the_token() {
        let (store, _) = store(DEFAULT_SESSION_TIMEOUT);
        let token = store.create("carol", Role::User);
        let session = store.validate(&token).unwrap();
        let rendered = format!("{session:?}");
        assert!(!rendered.contains(&token));
        assert!(rendered.contains("carol"));
    }
}
