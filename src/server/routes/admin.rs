//! Administrator endpoints: model lifecycle, remote backend, and users.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::with_users;
use crate::auth::{login_admin, UserSummary};
use crate::engine::{BackendMode, Coordinator, DeviceHint, OpReport, StatusSnapshot, DEFAULT_MAX_BATCH_SIZE};
use crate::error::CoordinatorError;
use crate::server::middleware::{AdminSession, ApiError};
use crate::server::state::AppState;

/// Create the administrator router, mounted under `/admin`.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/status", get(status))
        .route("/model/load", post(load_model))
        .route("/model/unload", post(unload_model))
        .route("/model/restart", post(restart_model))
        .route("/remote/connect", post(connect_remote))
        .route("/remote/disconnect", post(disconnect_remote))
        .route("/remote/health", post(refresh_remote_health))
        .route("/backend", post(set_backend))
        .route("/users", get(list_users).post(add_user))
        .route("/users/:name", delete(remove_user))
        .route("/users/:name/enabled", put(set_user_enabled))
        .route("/access", put(set_access))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct LoadRequest {
    backbone: Option<String>,
    codec: Option<String>,
    device: Option<String>,
    #[serde(default = "default_true")]
    enable_triton: bool,
    max_batch_size: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ConnectRequest {
    endpoint_url: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendRequest {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct AddUserRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

/// Result of a lifecycle operation
#[derive(Debug, Serialize)]
struct OpResponse {
    message: String,
    status: StatusSnapshot,
}

impl From<OpReport> for OpResponse {
    fn from(report: OpReport) -> Self {
        Self {
            message: report.message,
            status: (*report.status).clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AdminStatus {
    #[serde(flatten)]
    status: StatusSnapshot,
    backend: String,
    ready: bool,
    available_voices: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    access_enabled: bool,
    users: Vec<UserSummary>,
}

/// Run a lifecycle operation on its own task.
///
/// A client that disconnects mid-load must not cancel the load halfway, so
/// the operation is detached from the request future.
async fn run_lifecycle<F, Fut>(state: &AppState, op: F) -> Result<Json<OpResponse>, ApiError>
where
    F: FnOnce(Arc<Coordinator>) -> Fut,
    Fut: Future<Output = Result<OpReport, CoordinatorError>> + Send + 'static,
{
    let task = tokio::spawn(op(Arc::clone(&state.coordinator)));
    let report = task
        .await
        .map_err(|e| ApiError::Internal(format!("Lifecycle task failed: {e}")))??;
    Ok(Json(report.into()))
}

async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<TokenResponse>, ApiError> {
    let token = login_admin(&state.admin, &state.sessions, &request.password).ok_or(ApiError::Unauthorized)?;
    Ok(Json(TokenResponse { token }))
}

async fn status(_admin: AdminSession, State(state): State<AppState>) -> Json<AdminStatus> {
    let snapshot = state.coordinator.status();
    let available_voices = state.offered_voices(&snapshot.voices);
    Json(AdminStatus {
        backend: snapshot.backend_label(),
        ready: snapshot.is_ready(),
        status: (*snapshot).clone(),
        available_voices,
    })
}

async fn load_model(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<OpResponse>, ApiError> {
    let engine = &state.config.engine;
    let backbone = request.backbone.unwrap_or_else(|| engine.default_backbone.clone());
    let codec = request.codec.unwrap_or_else(|| engine.default_codec.clone());
    let device = request
        .device
        .as_deref()
        .map(DeviceHint::from_label)
        .unwrap_or(engine.default_device);
    let resource = state
        .config
        .resource_config(
            &backbone,
            &codec,
            device,
            request.enable_triton,
            request.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE),
        )
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    run_lifecycle(&state, move |c| async move { c.load(resource).await }).await
}

async fn unload_model(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<OpResponse>, ApiError> {
    run_lifecycle(&state, |c| async move { c.unload().await }).await
}

async fn restart_model(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<OpResponse>, ApiError> {
    run_lifecycle(&state, |c| async move { c.restart().await }).await
}

async fn connect_remote(
    _admin: AdminSession,
    State(state): State<AppState>,
    request: Option<Json<ConnectRequest>>,
) -> Result<Json<OpResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let endpoint = request
        .endpoint_url
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| state.config.remote.endpoint_url.clone());
    let token = request
        .auth_token
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.config.remote.auth_token.clone());

    if endpoint.trim().is_empty() || token.is_empty() {
        return Err(ApiError::BadRequest(
            "Remote endpoint URL and auth token are required".to_string(),
        ));
    }

    run_lifecycle(&state, move |c| async move { c.connect_remote(&endpoint, &token).await }).await
}

async fn disconnect_remote(_admin: AdminSession, State(state): State<AppState>) -> Result<Json<OpResponse>, ApiError> {
    run_lifecycle(&state, |c| async move { c.disconnect_remote().await }).await
}

async fn refresh_remote_health(_admin: AdminSession, State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let coordinator = Arc::clone(&state.coordinator);
    let healthy = tokio::spawn(async move { coordinator.refresh_remote_health().await })
        .await
        .map_err(|e| ApiError::Internal(format!("Health probe task failed: {e}")))?;
    Ok(Json(serde_json::json!({
        "connected": healthy.is_some(),
        "healthy": healthy.unwrap_or(false),
        "status": state.coordinator.status().as_ref(),
    })))
}

async fn set_backend(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(request): Json<BackendRequest>,
) -> Result<Json<OpResponse>, ApiError> {
    let mode = BackendMode::from_label(&request.mode)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown backend mode '{}'; use local or remote", request.mode)))?;
    run_lifecycle(&state, move |c| async move { c.set_backend_mode(mode).await }).await
}

async fn list_users(_admin: AdminSession, State(state): State<AppState>) -> Json<UsersResponse> {
    Json(UsersResponse {
        access_enabled: state.users.is_access_enabled(),
        users: state.users.list(),
    })
}

async fn add_user(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(request): Json<AddUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let AddUserRequest { username, password } = request;
    let added = username.clone();
    with_users(&state, move |users| users.add(&username, &password)).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": format!("User '{added}' added") })),
    ))
}

async fn remove_user(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = name.clone();
    with_users(&state, move |users| users.remove(&target)).await?;
    Ok(Json(serde_json::json!({ "message": format!("User '{name}' removed") })))
}

async fn set_user_enabled(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<EnabledRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (target, enabled) = (name.clone(), request.enabled);
    with_users(&state, move |users| users.set_enabled(&target, enabled)).await?;
    let verb = if request.enabled { "enabled" } else { "disabled" };
    Ok(Json(serde_json::json!({ "message": format!("User '{name}' {verb}") })))
}

async fn set_access(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(request): Json<EnabledRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let enabled = request.enabled;
    with_users(&state, move |users| users.set_access_enabled(enabled)).await?;
    Ok(Json(serde_json::json!({
        "message": if request.enabled { "Access control enabled" } else { "Access control disabled" },
        "access_enabled": request.enabled,
    })))
}
