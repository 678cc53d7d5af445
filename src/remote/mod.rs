//! Remote delegate: a synthesis server reached over HTTP.
//!
//! The coordinator only sees the [`RemoteDelegate`] and [`RemoteConnector`]
//! traits. [`RemoteClient`] is the HTTP implementation used in production.

mod client;
mod notebook;

pub use client::{ConnectionTest, HttpConnector, RemoteClient, RetryPolicy};
pub use notebook::{GeneratedNotebook, NotebookError, NotebookGenerator, NotebookParams};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::Synthesizer;
use crate::error::RemoteError;

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub ok: bool,
    pub payload: Value,
}

impl HealthReport {
    /// Interpret a `/health` response body. Healthy iff `status == "ok"`.
    pub fn from_payload(payload: Value) -> Self {
        let ok = payload.get("status").and_then(Value::as_str) == Some("ok");
        Self { ok, payload }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: json!({
                "status": "error",
                "error": error.into(),
                "model_loaded": false,
            }),
        }
    }

    /// Diagnostic for an unhealthy report.
    pub fn reason(&self) -> String {
        if let Some(error) = self.payload.get("error").and_then(Value::as_str) {
            return error.to_string();
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some(status) => format!("status '{status}'"),
            None => "malformed health response".to_string(),
        }
    }
}

/// A connected remote synthesis backend.
#[async_trait]
pub trait RemoteDelegate: Synthesizer {
    /// Normalized endpoint URL. Never includes the credential.
    fn endpoint(&self) -> &str;

    /// Bounded-time health probe. Transport failures are reported as
    /// unhealthy rather than as errors.
    async fn health_check(&self) -> HealthReport;
}

/// Creates delegates for an endpoint and credential.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, endpoint: &str, credential: &str) -> Result<Arc<dyn RemoteDelegate>, RemoteError>;
}
