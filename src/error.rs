//! Error types for the voxgate service.
//!
//! Each layer gets its own enum so callers can match on the outcomes they
//! care about. The binary glues them together with `anyhow`.

use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed lifecycle operation on the coordinator.
///
/// The message carried by every variant is the operator-facing diagnostic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Another mutating operation is in flight.
    #[error("{0}")]
    Busy(String),

    /// The operation cannot run in the current state. Nothing was changed.
    #[error("{0}")]
    Precondition(String),

    /// The local resource could not be constructed.
    #[error("Failed to load model: {0}")]
    Construction(String),

    /// A health probe against the remote delegate failed.
    #[error("Remote backend unhealthy: {0}")]
    RemoteUnhealthy(String),
}

impl CoordinatorError {
    /// Stable, machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Busy(_) => "busy",
            CoordinatorError::Precondition(_) => "precondition",
            CoordinatorError::Construction(_) => "construction_failure",
            CoordinatorError::RemoteUnhealthy(_) => "remote_unhealthy",
        }
    }
}

/// Errors raised while talking to a remote (or worker) synthesis endpoint.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid endpoint '{0}': expected an http:// or https:// URL")]
    InvalidEndpoint(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout(_) | RemoteError::Connect(_) => true,
            RemoteError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// HTTP statuses treated as transient by the remote client.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Errors surfaced by a synthesis call through a handle.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("input text is empty")]
    EmptyText,

    #[error("no audio was generated")]
    NoAudio,

    #[error("invalid voice reference: {0}")]
    Reference(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("engine error: {0}")]
    Engine(String),
}

/// Errors raised while assembling the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("environment variable {0} is not set")]
    MissingSecret(String),

    #[error("{name} must be at least {min} characters long")]
    SecretTooShort { name: String, min: usize },

    #[error("unknown {kind} '{name}'")]
    UnknownCatalogEntry { kind: &'static str, name: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
