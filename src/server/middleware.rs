//! Middleware for authentication, logging, and error mapping

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::auth::{Role, Session, UserStoreError};
use crate::error::{CoordinatorError, SynthesisError};
use crate::server::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// Session token from `Authorization: Bearer ...` or `x-api-key`.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).map(str::trim))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Errors returned by the HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    /// Missing, unknown, expired, or under-privileged session
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    /// No serving path is available
    NotReady(String),
    Coordinator(CoordinatorError),
    Synthesis(SynthesisError),
    Users(UserStoreError),
    Internal(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError::Coordinator(err)
    }
}

impl From<SynthesisError> for ApiError {
    fn from(err: SynthesisError) -> Self {
        ApiError::Synthesis(err)
    }
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        ApiError::Users(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Coordinator(err) => match err {
                CoordinatorError::Busy(_) => StatusCode::CONFLICT,
                CoordinatorError::Precondition(_) => StatusCode::PRECONDITION_FAILED,
                CoordinatorError::RemoteUnhealthy(_) => StatusCode::BAD_GATEWAY,
                CoordinatorError::Construction(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Synthesis(err) => match err {
                SynthesisError::EmptyText | SynthesisError::Reference(_) => StatusCode::BAD_REQUEST,
                SynthesisError::Remote(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Users(err) => match err {
                UserStoreError::Duplicate(_) => StatusCode::CONFLICT,
                UserStoreError::NotFound(_) => StatusCode::NOT_FOUND,
                UserStoreError::InvalidUsername(_) | UserStoreError::PasswordTooShort(_) => StatusCode::BAD_REQUEST,
                UserStoreError::Io(_) | UserStoreError::Serialization(_) | UserStoreError::Hash(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::NotReady(_) => "not_ready",
            ApiError::Coordinator(err) => err.kind(),
            ApiError::Synthesis(_) => "synthesis_failed",
            ApiError::Users(_) => "user_store",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::NotReady(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Coordinator(err) => err.to_string(),
            ApiError::Synthesis(err) => err.to_string(),
            ApiError::Users(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), "{}", self.message());
        }
        let body = Json(serde_json::json!({
            "error": self.message(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}

/// An authenticated administrator session.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        match state.sessions.validate(&token) {
            Some(session) if session.role == Role::Admin => Ok(AdminSession(session)),
            _ => {
                warn!(path = %parts.uri.path(), "Rejected admin request");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

/// Permission to use the synthesis path.
///
/// While access control is off anyone may synthesize and the session, if
/// any, is informational. While it is on, a live USER or ADMIN session is
/// required.
#[derive(Debug, Clone)]
pub struct UserAccess(pub Option<Session>);

#[async_trait]
impl FromRequestParts<AppState> for UserAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = extract_token(&parts.headers).and_then(|t| state.sessions.validate(&t));
        if state.users.is_access_enabled() && session.is_none() {
            return Err(ApiError::Unauthorized);
        }
        Ok(UserAccess(session))
    }
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!("{} {} {} ({:?})", method, path, status, duration);
    } else {
        info!("{} {} {} ({:?})", method, path, status, duration);
    }

    response
}
