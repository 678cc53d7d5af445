//! Inference traits and the opaque handle handed out by the coordinator.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::selection::{EngineVariant, LoadPlan};
use crate::audio::AudioBuffer;
use crate::error::SynthesisError;
use crate::remote::RemoteDelegate;

/// Reference clip and transcript the engine clones a voice from.
#[derive(Clone, Default)]
pub struct VoiceReference {
    /// Preset name, when the reference came from the voice catalog.
    pub name: Option<String>,
    /// WAV bytes of the reference clip.
    pub audio: Vec<u8>,
    pub transcript: String,
}

impl VoiceReference {
    pub fn new(audio: Vec<u8>, transcript: impl Into<String>) -> Self {
        Self {
            name: None,
            audio,
            transcript: transcript.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for VoiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceReference")
            .field("name", &self.name)
            .field("audio_bytes", &self.audio.len())
            .field("transcript", &self.transcript)
            .finish()
    }
}

/// Anything that can turn text into audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one chunk of text.
    async fn infer(&self, text: &str, reference: &VoiceReference) -> Result<AudioBuffer, SynthesisError>;

    /// Whether `infer_batch` is a native batch call rather than a loop.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Synthesize several chunks. Defaults to sequential `infer` calls.
    async fn infer_batch(
        &self,
        chunks: &[String],
        reference: &VoiceReference,
    ) -> Result<Vec<AudioBuffer>, SynthesisError> {
        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            out.push(self.infer(chunk, reference).await?);
        }
        Ok(out)
    }
}

/// A locally constructed resource owned by the coordinator.
///
/// Implementations that hold device memory or a child process override
/// `has_teardown` and `teardown`; the coordinator calls `teardown` exactly once
/// before dropping its reference.
#[async_trait]
pub trait LocalEngine: Synthesizer {
    fn has_teardown(&self) -> bool {
        false
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Which serving path a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Local(EngineVariant),
    Remote,
}

#[derive(Clone)]
enum Target {
    Local { engine: Arc<dyn LocalEngine>, plan: LoadPlan },
    Remote(Arc<dyn RemoteDelegate>),
}

/// Opaque, cheaply cloneable reference to the current serving path.
///
/// A handle stays usable after the coordinator unloads or swaps the backend;
/// calls made through a stale handle reach a torn-down resource and may fail.
/// Fetch a fresh handle per request.
#[derive(Clone)]
pub struct Handle {
    target: Target,
}

impl Handle {
    pub(crate) fn local(engine: Arc<dyn LocalEngine>, plan: LoadPlan) -> Self {
        Self {
            target: Target::Local { engine, plan },
        }
    }

    pub(crate) fn remote(delegate: Arc<dyn RemoteDelegate>) -> Self {
        Self {
            target: Target::Remote(delegate),
        }
    }

    pub fn kind(&self) -> HandleKind {
        match &self.target {
            Target::Local { plan, .. } => HandleKind::Local(plan.variant),
            Target::Remote(_) => HandleKind::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.target, Target::Remote(_))
    }

    /// Human readable description for logs and responses.
    pub fn describe(&self) -> String {
        match &self.target {
            Target::Local { plan, .. } => format!(
                "local {} (backbone on {}, codec on {})",
                plan.variant, plan.backbone_device, plan.codec_device
            ),
            Target::Remote(delegate) => format!("remote {}", delegate.endpoint()),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.describe()).finish()
    }
}

#[async_trait]
impl Synthesizer for Handle {
    async fn infer(&self, text: &str, reference: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        match &self.target {
            Target::Local { engine, .. } => engine.infer(text, reference).await,
            Target::Remote(delegate) => delegate.infer(text, reference).await,
        }
    }

    fn supports_batch(&self) -> bool {
        match &self.target {
            Target::Local { engine, .. } => engine.supports_batch(),
            Target::Remote(delegate) => delegate.supports_batch(),
        }
    }

    async fn infer_batch(
        &self,
        chunks: &[String],
        reference: &VoiceReference,
    ) -> Result<Vec<AudioBuffer>, SynthesisError> {
        match &self.target {
            Target::Local { engine, .. } => engine.infer_batch(chunks, reference).await,
            Target::Remote(delegate) => delegate.infer_batch(chunks, reference).await,
        }
    }
}
