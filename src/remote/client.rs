//! HTTP client for a remote synthesis endpoint.
//!
//! Protocol: `GET /health` answers `{"status": "ok", ...}` when the server is
//! ready, and `POST /tts/synthesize` takes the text plus a base64 reference
//! clip and answers `{"audio_base64": "<wav>"}`. Every request carries a
//! bearer token.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{HealthReport, RemoteConnector, RemoteDelegate};
use crate::audio::AudioBuffer;
use crate::engine::{Synthesizer, VoiceReference};
use crate::error::{RemoteError, SynthesisError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in a [`RemoteError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

/// Outcome of [`RemoteClient::test_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
    pub latency: Duration,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_audio_base64: String,
    voice_transcript: &'a str,
    speed: f32,
    watermark: bool,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    audio_base64: String,
}

/// Client for one remote endpoint.
#[derive(Clone)]
pub struct RemoteClient {
    endpoint: String,
    token: String,
    http: Client,
    timeout: Duration,
    health_timeout: Duration,
    retry: RetryPolicy,
    speed: f32,
    watermark: bool,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RemoteClient {
    pub fn new(endpoint: &str, token: &str) -> Result<Self, RemoteError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let http = Client::builder()
            .connect_timeout(DEFAULT_HEALTH_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;

        Ok(Self {
            endpoint,
            token: token.to_string(),
            http,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            retry: RetryPolicy::default(),
            speed: 1.0,
            watermark: true,
        })
    }

    pub fn with_timeouts(mut self, request: Duration, health: Duration) -> Self {
        self.timeout = request;
        self.health_timeout = health;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Speech speed and watermarking sent with every synthesis request.
    pub fn with_voice_options(mut self, speed: f32, watermark: bool) -> Self {
        self.speed = speed;
        self.watermark = watermark;
        self
    }

    /// Probe `/health`. Transport errors produce an unhealthy report.
    pub async fn health(&self) -> HealthReport {
        match self.fetch_health().await {
            Ok(payload) => HealthReport::from_payload(payload),
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "Health probe failed");
                HealthReport::failed(err.to_string())
            }
        }
    }

    /// Probe the endpoint and report latency, for operators.
    pub async fn test_connection(&self) -> ConnectionTest {
        let started = Instant::now();
        let report = self.health().await;
        let latency = started.elapsed();

        let message = if report.ok {
            let loaded = report
                .payload
                .get("model_loaded")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            format!(
                "Connected to {} in {} ms (model loaded: {})",
                self.endpoint,
                latency.as_millis(),
                loaded
            )
        } else {
            format!("Connection to {} failed: {}", self.endpoint, report.reason())
        };

        ConnectionTest {
            ok: report.ok,
            message,
            latency,
        }
    }

    /// Synthesize `text` with the voice in `reference`.
    pub async fn synthesize(&self, text: &str, reference: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        if reference.audio.is_empty() {
            return Err(SynthesisError::Reference("reference audio is empty".to_string()));
        }

        let body = SynthesizeRequest {
            text,
            voice_audio_base64: BASE64.encode(&reference.audio),
            voice_transcript: &reference.transcript,
            speed: self.speed,
            watermark: self.watermark,
        };
        let url = format!("{}/tts/synthesize", self.endpoint);
        let response = self
            .send_with_retry(
                || {
                    self.http
                        .post(&url)
                        .bearer_auth(&self.token)
                        .timeout(self.timeout)
                        .json(&body)
                },
                self.timeout,
            )
            .await?;

        let payload: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let wav = BASE64
            .decode(payload.audio_base64.as_bytes())
            .map_err(|e| RemoteError::Decode(format!("audio_base64: {e}")))?;
        AudioBuffer::from_wav_bytes(&wav)
    }

    async fn fetch_health(&self) -> Result<Value, RemoteError> {
        let url = format!("{}/health", self.endpoint);
        let response = self
            .send_with_retry(
                || {
                    self.http
                        .get(&url)
                        .bearer_auth(&self.token)
                        .timeout(self.health_timeout)
                },
                self.health_timeout,
            )
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Send a request, retrying transient failures per the retry policy.
    async fn send_with_retry<F>(&self, build: F, timeout: Duration) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let mut body = response.text().await.unwrap_or_default();
                    truncate_chars(&mut body, MAX_ERROR_BODY);
                    RemoteError::Status { status, body }
                }
                Err(e) if e.is_timeout() => RemoteError::Timeout(timeout),
                Err(e) if e.is_connect() => RemoteError::Connect(e.to_string()),
                Err(e) => RemoteError::Request(e.to_string()),
            };

            if !failure.is_retryable() || attempt >= self.retry.max_retries {
                return Err(failure);
            }
            attempt += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                endpoint = %self.endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Transient failure from remote backend, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Synthesizer for RemoteClient {
    async fn infer(&self, text: &str, reference: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        self.synthesize(text, reference).await
    }
}

#[async_trait]
impl RemoteDelegate for RemoteClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health_check(&self) -> HealthReport {
        self.health().await
    }
}

/// Builds [`RemoteClient`]s with shared timeout and retry settings.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    pub timeout: Duration,
    pub health_timeout: Duration,
    pub retry: RetryPolicy,
    pub speed: f32,
    pub watermark: bool,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            retry: RetryPolicy::default(),
            speed: 1.0,
            watermark: true,
        }
    }
}

impl HttpConnector {
    pub fn client(&self, endpoint: &str, credential: &str) -> Result<RemoteClient, RemoteError> {
        Ok(RemoteClient::new(endpoint, credential)?
            .with_timeouts(self.timeout, self.health_timeout)
            .with_retry(self.retry.clone())
            .with_voice_options(self.speed, self.watermark))
    }
}

impl RemoteConnector for HttpConnector {
    fn connect(&self, endpoint: &str, credential: &str) -> Result<Arc<dyn RemoteDelegate>, RemoteError> {
        Ok(Arc::new(self.client(endpoint, credential)?))
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String, RemoteError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let lower = trimmed.to_ascii_lowercase();
    let has_scheme = lower.starts_with("http://") || lower.starts_with("https://");
    let has_host = trimmed.split("://").nth(1).is_some_and(|rest| !rest.is_empty());
    if !has_scheme || !has_host {
        return Err(RemoteError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(trimmed.to_string())
}

fn truncate_chars(text: &mut String, max: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
}
