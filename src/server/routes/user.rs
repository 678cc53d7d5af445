//! End-user endpoints: login, readiness, and synthesis.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::admin::TokenResponse;
use super::with_users;
use crate::auth::login_user;
use crate::engine::{BackendMode, VoiceReference};
use crate::server::middleware::{extract_token, ApiError, UserAccess};
use crate::server::state::AppState;
use crate::synthesis::synthesize_long;

const CHUNKS_HEADER: HeaderName = HeaderName::from_static("x-voxgate-chunks");
const ELAPSED_HEADER: HeaderName = HeaderName::from_static("x-voxgate-elapsed-ms");

/// Create the user router, mounted at the root.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/status", get(status))
        .route("/synthesize", post(synthesize))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct PublicStatus {
    ready: bool,
    backend: String,
    mode: BackendMode,
    message: String,
    voices: Vec<String>,
    access_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct SynthesizeRequest {
    text: String,
    /// Preset voice name from the catalog
    voice: Option<String>,
    /// Custom reference clip (base64 WAV) and its transcript
    reference_audio_base64: Option<String>,
    reference_text: Option<String>,
}

async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<TokenResponse>, ApiError> {
    // bcrypt verification, on the blocking pool.
    let sessions = Arc::clone(&state.sessions);
    let token = with_users(&state, move |users| {
        Ok(login_user(users, &sessions, &request.username, &request.password))
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;
    Ok(Json(TokenResponse { token }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = extract_token(&headers) {
        state.sessions.invalidate(&token);
    }
    Json(serde_json::json!({ "message": "Logged out" }))
}

async fn status(State(state): State<AppState>) -> Json<PublicStatus> {
    let snapshot = state.coordinator.status();
    let ready = snapshot.is_ready();
    let message = if ready {
        format!("Ready ({} backend)", snapshot.backend_label())
    } else if let Some(err) = &snapshot.error {
        format!("Model failed to load: {err}")
    } else {
        "No model is loaded. Please ask an administrator to load one.".to_string()
    };

    Json(PublicStatus {
        ready,
        backend: snapshot.backend_label(),
        mode: snapshot.mode,
        message,
        voices: state.offered_voices(&snapshot.voices),
        access_enabled: state.users.is_access_enabled(),
    })
}

async fn synthesize(
    UserAccess(session): UserAccess,
    State(state): State<AppState>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text must not be empty".to_string()));
    }

    // Fetched per request; a handle held across an unload may fail.
    let handle = state.coordinator.get_handle().ok_or_else(|| {
        ApiError::NotReady("No backend is ready. Please ask an administrator to load a model.".to_string())
    })?;
    let reference = resolve_reference(&state, &request).await?;

    debug!(
        identity = session.as_ref().map(|s| s.identity.as_str()).unwrap_or("anonymous"),
        backend = %handle.describe(),
        chars = request.text.chars().count(),
        "Synthesis request"
    );

    let outcome = synthesize_long(
        &handle,
        &request.text,
        &reference,
        state.config.text.max_chars_per_chunk,
        true,
    )
    .await?;
    let wav = outcome.audio.to_wav_bytes()?;

    info!(
        chunks = outcome.chunks,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        bytes = wav.len(),
        "Synthesis served"
    );

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (CHUNKS_HEADER, HeaderValue::from(outcome.chunks)),
            (ELAPSED_HEADER, HeaderValue::from(outcome.elapsed.as_millis() as u64)),
        ],
        wav,
    ))
}

/// Build the voice reference from a preset or an uploaded clip.
async fn resolve_reference(state: &AppState, request: &SynthesizeRequest) -> Result<VoiceReference, ApiError> {
    if let Some(name) = request.voice.as_deref().filter(|v| !v.is_empty()) {
        // Same list `/status` advertises.
        let status = state.coordinator.status();
        if !state.offered_voices(&status.voices).iter().any(|v| v == name) {
            return Err(if status.voices.allows(name) {
                ApiError::NotFound(format!("Voice '{name}' is not in the catalog"))
            } else {
                ApiError::BadRequest(format!("Voice '{name}' is not supported by the active backend"))
            });
        }
        let sample = state
            .config
            .voice(name)
            .map_err(|e| ApiError::NotFound(e.to_string()))?;
        let audio = tokio::fs::read(&sample.audio)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read voice sample {}: {e}", sample.audio.display())))?;
        let transcript = tokio::fs::read_to_string(&sample.text)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read voice transcript {}: {e}", sample.text.display())))?;
        return Ok(VoiceReference::new(audio, transcript.trim()).named(name));
    }

    let Some(encoded) = request.reference_audio_base64.as_deref() else {
        return Err(ApiError::BadRequest(
            "Choose a preset voice or upload a reference clip".to_string(),
        ));
    };
    let transcript = request.reference_text.as_deref().map(str::trim).unwrap_or_default();
    if transcript.is_empty() {
        return Err(ApiError::BadRequest(
            "A custom reference clip needs its transcript".to_string(),
        ));
    }
    let audio = BASE64
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("Reference audio is not valid base64: {e}")))?;
    Ok(VoiceReference::new(audio, transcript))
}
