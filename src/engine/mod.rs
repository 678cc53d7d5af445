//! Synthesis engine lifecycle.
//!
//! [`Coordinator`] owns the local resource and the local/remote routing
//! decision. Construction is delegated to a [`ResourceFactory`]; the
//! implementation it builds is chosen by the pure [`classify`] function.

mod coordinator;
mod factory;
mod handle;
mod process;
mod selection;
mod types;
mod voices;

pub use coordinator::{Coordinator, CoordinatorOptions, DEFAULT_PROBE_TIMEOUT};
pub use factory::{DeviceProbe, ResourceFactory, StaticDevices, SystemDevices};
pub use handle::{Handle, HandleKind, LocalEngine, Synthesizer, VoiceReference};
pub use process::{EngineCommand, ProcessEngine, ProcessFactory};
pub use selection::{classify, is_onnx_codec, is_quantized_backbone, Device, EngineVariant, LoadPlan};
pub use types::{
    BackendMode, DeviceHint, OpReport, RemoteHealth, ResourceConfig, ResourceState, StatusSnapshot,
    DEFAULT_MAX_BATCH_SIZE,
};
pub use voices::VoiceFilter;
