//! Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use voxgate_core::audio::AudioBuffer;
use voxgate_core::engine::{
    Coordinator, CoordinatorOptions, LoadPlan, LocalEngine, ResourceConfig, ResourceFactory, StaticDevices,
    Synthesizer, VoiceReference,
};
use voxgate_core::error::{RemoteError, SynthesisError};
use voxgate_core::remote::{HealthReport, RemoteConnector, RemoteDelegate};

pub const SAMPLE_RATE: u32 = 24_000;

/// Local engine producing a short constant tone per chunk.
pub struct ToneEngine {
    pub torn_down: AtomicBool,
    pub calls: AtomicUsize,
}

impl ToneEngine {
    pub fn new() -> Self {
        Self {
            torn_down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ToneEngine {
    async fn infer(&self, text: &str, _: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        if self.is_torn_down() {
            return Err(SynthesisError::Engine("engine has been torn down".into()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AudioBuffer::new(vec![0.25; text.chars().count() * 10], SAMPLE_RATE))
    }
}

#[async_trait]
impl LocalEngine for ToneEngine {
    fn has_teardown(&self) -> bool {
        true
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        self.torn_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Lets a test hold a construction open.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Factory that records every construction and can fail or block on demand.
#[derive(Default)]
pub struct FakeFactory {
    pub constructions: AtomicUsize,
    pub fail_with: Mutex<Option<String>>,
    pub gate: Option<Arc<Gate>>,
    pub engines: Mutex<Vec<Arc<ToneEngine>>>,
    pub plans: Mutex<Vec<LoadPlan>>,
    pub configs: Mutex<Vec<ResourceConfig>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn fail_next(&self, reason: &str) {
        *self.fail_with.lock() = Some(reason.to_string());
    }

    pub fn succeed(&self) {
        *self.fail_with.lock() = None;
    }

    pub fn count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn engine(&self, index: usize) -> Arc<ToneEngine> {
        Arc::clone(&self.engines.lock()[index])
    }
}

#[async_trait]
impl ResourceFactory for FakeFactory {
    async fn construct(&self, config: &ResourceConfig, plan: &LoadPlan) -> anyhow::Result<Arc<dyn LocalEngine>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().push(*plan);
        self.configs.lock().push(config.clone());

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let failure = self.fail_with.lock().clone();
        if let Some(reason) = failure {
            anyhow::bail!(reason);
        }

        let engine = Arc::new(ToneEngine::new());
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

/// Remote delegate whose health is controlled by the test.
pub struct FakeDelegate {
    endpoint: String,
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl Synthesizer for FakeDelegate {
    async fn infer(&self, text: &str, _: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        Ok(AudioBuffer::new(vec![-0.25; text.chars().count() * 5], SAMPLE_RATE))
    }
}

#[async_trait]
impl RemoteDelegate for FakeDelegate {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health_check(&self) -> HealthReport {
        if self.healthy.load(Ordering::SeqCst) {
            HealthReport::from_payload(serde_json::json!({"status": "ok", "model_loaded": true}))
        } else {
            HealthReport::failed("connection refused")
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub healthy: Arc<AtomicBool>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn healthy() -> Arc<Self> {
        let connector = Self::default();
        connector.healthy.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl RemoteConnector for FakeConnector {
    fn connect(&self, endpoint: &str, _credential: &str) -> Result<Arc<dyn RemoteDelegate>, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeDelegate {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            healthy: Arc::clone(&self.healthy),
        }))
    }
}

pub fn quantized_voices() -> Vec<String> {
    ["Binh", "Tuyen", "Vinh", "Doan", "Ly", "Ngoc"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn coordinator(factory: Arc<FakeFactory>, gpu: bool, connector: Arc<FakeConnector>) -> Coordinator {
    Coordinator::with_options(
        factory,
        Arc::new(StaticDevices { gpu }),
        connector,
        CoordinatorOptions {
            probe_timeout: Duration::from_secs(2),
            quantized_voices: quantized_voices(),
        },
    )
}

pub fn standard_config() -> ResourceConfig {
    ResourceConfig::new("pnnbao-ump/VieNeu-TTS", "neuphonic/distill-neucodec")
}

pub fn reference() -> VoiceReference {
    VoiceReference::new(vec![1, 2, 3, 4], "xin chào").named("Binh")
}
