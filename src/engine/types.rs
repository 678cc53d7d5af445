//! Value types shared by the coordinator, its status snapshot and callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::selection::LoadPlan;
use super::voices::VoiceFilter;

/// Default number of requests the accelerated runtime may batch together.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 8;

/// Device placement requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHint {
    /// Use a GPU when one is present, otherwise the CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DeviceHint {
    /// Parse an operator supplied label. Unknown labels mean `Auto`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "cpu" => DeviceHint::Cpu,
            "cuda" | "gpu" => DeviceHint::Cuda,
            _ => DeviceHint::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHint::Auto => "auto",
            DeviceHint::Cpu => "cpu",
            DeviceHint::Cuda => "cuda",
        }
    }
}

impl fmt::Display for DeviceHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource configuration captured at load time and reused by restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Backbone model identifier (repository or file name).
    pub backbone: String,
    /// Codec model identifier.
    pub codec: String,
    pub backbone_device: DeviceHint,
    pub codec_device: DeviceHint,
    /// Compile kernels with Triton in the accelerated runtime. A tuning knob
    /// handed to the worker; it does not affect classification.
    pub enable_triton: bool,
    pub max_batch_size: usize,
}

impl ResourceConfig {
    pub fn new(backbone: impl Into<String>, codec: impl Into<String>) -> Self {
        Self {
            backbone: backbone.into(),
            codec: codec.into(),
            backbone_device: DeviceHint::Auto,
            codec_device: DeviceHint::Auto,
            enable_triton: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Place both backbone and codec using the same hint.
    pub fn with_device(mut self, hint: DeviceHint) -> Self {
        self.backbone_device = hint;
        self.codec_device = hint;
        self
    }

    pub fn with_codec_device(mut self, hint: DeviceHint) -> Self {
        self.codec_device = hint;
        self
    }

    pub fn with_batching(mut self, enable_triton: bool, max_batch_size: usize) -> Self {
        self.enable_triton = enable_triton;
        self.max_batch_size = max_batch_size.max(1);
        self
    }
}

/// Lifecycle state of the local resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Error,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Unloaded => "unloaded",
            ResourceState::Loading => "loading",
            ResourceState::Loaded => "loaded",
            ResourceState::Error => "error",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which serving path `get_handle` prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Local,
    Remote,
}

impl BackendMode {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "local" => Some(BackendMode::Local),
            "remote" => Some(BackendMode::Remote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Local => "local",
            BackendMode::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known health of the remote delegate. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteHealth {
    pub endpoint: String,
    pub healthy: bool,
    pub payload: serde_json::Value,
    pub checked_at: DateTime<Utc>,
}

/// Point-in-time copy of the coordinator's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: ResourceState,
    /// Diagnostic; present exactly when `state` is `Error`.
    pub error: Option<String>,
    /// Configuration being loaded or currently loaded.
    pub config: Option<ResourceConfig>,
    /// Implementation chosen for the loaded resource.
    pub plan: Option<LoadPlan>,
    pub local_loaded: bool,
    pub mode: BackendMode,
    pub remote: Option<RemoteHealth>,
    pub voices: VoiceFilter,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub(crate) fn initial() -> Self {
        Self {
            state: ResourceState::Unloaded,
            error: None,
            config: None,
            plan: None,
            local_loaded: false,
            mode: BackendMode::Local,
            remote: None,
            voices: VoiceFilter::All,
            updated_at: Utc::now(),
        }
    }

    pub fn remote_healthy(&self) -> bool {
        self.remote.as_ref().is_some_and(|r| r.healthy)
    }

    /// Whether `get_handle` currently routes to the remote delegate.
    pub fn serving_remote(&self) -> bool {
        self.mode == BackendMode::Remote && self.remote_healthy()
    }

    /// Whether any serving path is available right now.
    pub fn is_ready(&self) -> bool {
        self.serving_remote() || self.local_loaded
    }

    /// Short label for the active serving path.
    pub fn backend_label(&self) -> String {
        if self.serving_remote() {
            return "remote".to_string();
        }
        match (&self.plan, self.local_loaded) {
            (Some(plan), true) => plan.variant.to_string(),
            _ => "none".to_string(),
        }
    }
}

/// Successful result of a lifecycle operation.
#[derive(Debug, Clone)]
pub struct OpReport {
    pub message: String,
    pub status: Arc<StatusSnapshot>,
}
