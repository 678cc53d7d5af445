//! HTTP route groups

pub mod admin;
pub mod user;

use std::sync::Arc;

use crate::auth::{UserStore, UserStoreError};
use crate::server::middleware::ApiError;
use crate::server::state::AppState;

/// Run a user store call on the blocking pool. Every store call may hash a
/// password or rewrite the users file.
pub(crate) async fn with_users<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&UserStore) -> Result<T, UserStoreError> + Send + 'static,
    T: Send + 'static,
{
    let users = Arc::clone(&state.users);
    tokio::task::spawn_blocking(move || op(&users))
        .await
        .map_err(|e| ApiError::Internal(format!("User store task failed: {e}")))?
        .map_err(ApiError::from)
}
