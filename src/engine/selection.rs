//! Pure classification from a resource configuration to a load plan.
//!
//! The classifier is total: every configuration maps to a plan, and absent or
//! contradictory hints resolve to the most portable choice. A GPU-only
//! implementation is selected only when `gpu_available` is true.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{DeviceHint, ResourceConfig};

/// Concrete implementation that will be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVariant {
    /// Portable implementation, runs anywhere.
    Standard,
    /// Accelerated runtime with request batching. GPU only.
    Accelerated,
    /// Quantized single-file backbone with its own GPU offload.
    Quantized,
}

impl EngineVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineVariant::Standard => "standard",
            EngineVariant::Accelerated => "accelerated",
            EngineVariant::Quantized => "quantized",
        }
    }

    /// Whether the implementation only supports a known-good voice subset.
    pub fn is_constrained(&self) -> bool {
        matches!(self, EngineVariant::Quantized)
    }

    /// Whether the implementation exposes a native batch entry point.
    pub fn supports_batch(&self) -> bool {
        matches!(self, EngineVariant::Accelerated)
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device a component is actually placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    /// GPU offload managed by the quantized runtime itself.
    Gpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Gpu => "gpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadPlan {
    pub variant: EngineVariant,
    pub backbone_device: Device,
    pub codec_device: Device,
}

/// Whether the backbone names a quantized single-file model.
pub fn is_quantized_backbone(backbone: &str) -> bool {
    backbone.to_ascii_lowercase().contains("gguf")
}

/// Whether the codec names an ONNX export, which always runs on the CPU.
pub fn is_onnx_codec(codec: &str) -> bool {
    codec.to_ascii_lowercase().contains("onnx")
}

/// Classify `config` for a host where a GPU is or is not available.
pub fn classify(config: &ResourceConfig, gpu_available: bool) -> LoadPlan {
    let wants_gpu = matches!(config.backbone_device, DeviceHint::Auto | DeviceHint::Cuda);

    let (variant, backbone_device) = if is_quantized_backbone(&config.backbone) {
        let device = if wants_gpu && gpu_available {
            Device::Gpu
        } else {
            Device::Cpu
        };
        (EngineVariant::Quantized, device)
    } else if wants_gpu && gpu_available {
        (EngineVariant::Accelerated, Device::Cuda)
    } else {
        (EngineVariant::Standard, Device::Cpu)
    };

    let codec_device = if is_onnx_codec(&config.codec) || config.codec_device == DeviceHint::Cpu {
        Device::Cpu
    } else if backbone_device.is_gpu() {
        Device::Cuda
    } else {
        Device::Cpu
    };

    LoadPlan {
        variant,
        backbone_device,
        codec_device,
    }
}
