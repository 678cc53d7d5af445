//! Authentication for the control plane and the request path.
//!
//! Credentials are checked by a [`CredentialStore`]; a successful check is
//! exchanged for a fixed-lifetime token from the [`SessionStore`]. The session
//! store never sees a password.

mod admin;
mod session;
mod users;

pub use admin::{AdminSecret, ADMIN_IDENTITY};
pub use session::{
    Clock, ManualClock, Role, Session, SessionStore, SystemClock, DEFAULT_SESSION_TIMEOUT, SESSION_TOKEN_PREFIX,
};
pub use users::{
    hash_password, hash_password_with_cost, verify_password, UserRecord, UserStore, UserStoreError, UserSummary,
    DEFAULT_HASH_COST,
};

/// Source of truth for user credentials.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, identity: &str, secret: &str) -> bool;

    fn is_enabled(&self, identity: &str) -> bool;
}

/// Exchange user credentials for a session token.
///
/// Returns `None` for wrong credentials and for disabled accounts alike.
pub fn login_user(
    credentials: &dyn CredentialStore,
    sessions: &SessionStore,
    identity: &str,
    secret: &str,
) -> Option<String> {
    if credentials.is_enabled(identity) && credentials.verify(identity, secret) {
        Some(sessions.create(identity, Role::User))
    } else {
        tracing::debug!(identity, "User login rejected");
        None
    }
}

/// Exchange the administrator password for an admin session token.
pub fn login_admin(admin: &AdminSecret, sessions: &SessionStore, secret: &str) -> Option<String> {
    if admin.verify(secret) {
        Some(sessions.create(ADMIN_IDENTITY, Role::Admin))
    } else {
        tracing::warn!("Admin login rejected");
        None
    }
}
