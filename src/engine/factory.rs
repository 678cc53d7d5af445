//! Pluggable construction of the local resource and device probing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::handle::LocalEngine;
use super::selection::LoadPlan;
use super::types::ResourceConfig;

/// Builds the local resource for a classified configuration.
///
/// The coordinator treats construction as a black box: any error becomes the
/// diagnostic of the `Error` state.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn construct(&self, config: &ResourceConfig, plan: &LoadPlan) -> anyhow::Result<Arc<dyn LocalEngine>>;
}

/// Host device information consumed by classification.
pub trait DeviceProbe: Send + Sync {
    fn gpu_available(&self) -> bool;

    /// Best-effort release of cached device memory after a teardown.
    fn reclaim(&self) {}
}

/// Probe the real host for a usable NVIDIA GPU.
#[derive(Debug, Clone, Default)]
pub struct SystemDevices {
    force_cpu: bool,
}

impl SystemDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report no GPU regardless of the host.
    pub fn cpu_only() -> Self {
        Self { force_cpu: true }
    }
}

impl DeviceProbe for SystemDevices {
    fn gpu_available(&self) -> bool {
        if self.force_cpu {
            return false;
        }
        // An empty or "-1" device list hides every GPU from the runtime.
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let visible = visible.trim();
            if visible.is_empty() || visible == "-1" {
                return false;
            }
        }
        Path::new("/proc/driver/nvidia/version").exists() || Path::new("/dev/nvidia0").exists()
    }

    fn reclaim(&self) {
        debug!("Device memory reclaimed by process teardown");
    }
}

/// Probe with a fixed answer, for hosts configured by hand and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticDevices {
    pub gpu: bool,
}

impl DeviceProbe for StaticDevices {
    fn gpu_available(&self) -> bool {
        self.gpu
    }
}
