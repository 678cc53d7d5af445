//! Resource lifecycle coordinator.
//!
//! The coordinator is the only owner of the local synthesis resource and of the
//! choice between the local and remote serving paths. Every mutating
//! operation takes the lifecycle lock with `try_lock`: a second mutation that
//! arrives while one is in flight is rejected with [`CoordinatorError::Busy`]
//! instead of queueing behind a load that may take minutes.
//!
//! Readers never touch the lifecycle lock. Each mutation publishes an
//! immutable [`StatusSnapshot`] together with the handles it describes, and
//! `status`/`get_handle` clone those out from behind a short read lock. A
//! handle is published only after construction has succeeded, so a
//! half-built resource is never observable.
//!
//! Remote health lives beside the lifecycle state rather than inside it. A
//! refresh updates it under the publish lock only, so the health monitor never
//! contends with an operator's lifecycle call.
//!
//! Unload does not wait for in-flight requests. Handles are reference
//! counted, so a request that fetched a handle before the unload keeps the
//! engine object alive, but the engine has been torn down and the call may
//! fail. Callers fetch a handle per request and treat failure as retryable.

use chrono::Utc;
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use super::factory::{DeviceProbe, ResourceFactory};
use super::handle::{Handle, LocalEngine};
use super::selection::{classify, LoadPlan};
use super::types::{BackendMode, OpReport, RemoteHealth, ResourceConfig, ResourceState, StatusSnapshot};
use super::voices::VoiceFilter;
use crate::error::CoordinatorError;
use crate::remote::{HealthReport, RemoteConnector, RemoteDelegate};

/// Upper bound on a single remote health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning for a [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub probe_timeout: Duration,
    /// Voices the quantized implementation is known to handle.
    pub quantized_voices: Vec<String>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            quantized_voices: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct RemoteLink {
    delegate: Arc<dyn RemoteDelegate>,
    health: Arc<SyncMutex<RemoteHealth>>,
}

impl RemoteLink {
    fn is_same(&self, other: &RemoteLink) -> bool {
        Arc::ptr_eq(&self.health, &other.health)
    }
}

/// State guarded by the lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    state: ResourceState,
    error: Option<String>,
    /// Configuration being loaded or loaded.
    config: Option<ResourceConfig>,
    /// Last configuration that loaded successfully. Cleared on unload.
    restart_config: Option<ResourceConfig>,
    plan: Option<LoadPlan>,
    local: Option<Arc<dyn LocalEngine>>,
    remote: Option<RemoteLink>,
    mode: BackendMode,
}

/// What readers see. Replaced wholesale on every mutation.
struct Published {
    snapshot: Arc<StatusSnapshot>,
    local: Option<Handle>,
    remote: Option<Handle>,
    link: Option<RemoteLink>,
}

/// Owner of the synthesis resource lifecycle. Construct one per process and
/// share it behind an `Arc`.
pub struct Coordinator {
    lifecycle: Mutex<Lifecycle>,
    published: RwLock<Published>,
    factory: Arc<dyn ResourceFactory>,
    devices: Arc<dyn DeviceProbe>,
    connector: Arc<dyn RemoteConnector>,
    options: CoordinatorOptions,
}

impl Coordinator {
    pub fn new(
        factory: Arc<dyn ResourceFactory>,
        devices: Arc<dyn DeviceProbe>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        Self::with_options(factory, devices, connector, CoordinatorOptions::default())
    }

    pub fn with_options(
        factory: Arc<dyn ResourceFactory>,
        devices: Arc<dyn DeviceProbe>,
        connector: Arc<dyn RemoteConnector>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::default()),
            published: RwLock::new(Published {
                snapshot: Arc::new(StatusSnapshot::initial()),
                local: None,
                remote: None,
                link: None,
            }),
            factory,
            devices,
            connector,
            options,
        }
    }

    /// Current status. Never waits for an in-flight mutation.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.published.read().snapshot)
    }

    /// Handle for the active serving path, if any.
    ///
    /// The remote delegate wins when the mode is remote and it is healthy;
    /// otherwise the local resource is returned when loaded.
    pub fn get_handle(&self) -> Option<Handle> {
        let published = self.published.read();
        if published.snapshot.serving_remote() {
            if let Some(remote) = &published.remote {
                return Some(remote.clone());
            }
        }
        if published.snapshot.local_loaded {
            return published.local.clone();
        }
        None
    }

    /// Load the local resource.
    ///
    /// A no-op when already loaded, even if `config` differs from the loaded
    /// configuration. Unload first to switch models.
    #[instrument(name = "coordinator.load", skip(self, config), fields(backbone = %config.backbone, codec = %config.codec))]
    pub async fn load(&self, config: ResourceConfig) -> Result<OpReport, CoordinatorError> {
        let mut lc = self.acquire()?;
        match lc.state {
            ResourceState::Loaded => {
                info!("Model already loaded, ignoring load request");
                return Ok(self.report("Model already loaded"));
            }
            ResourceState::Loading => warn!("Previous load was abandoned mid-flight, loading again"),
            ResourceState::Unloaded | ResourceState::Error => {}
        }

        let plan = self.load_locked(&mut lc, config).await?;
        Ok(self.report(format!("Model loaded successfully ({} backend)", plan.variant)))
    }

    /// Release the local resource.
    #[instrument(name = "coordinator.unload", skip(self))]
    pub async fn unload(&self) -> Result<OpReport, CoordinatorError> {
        let mut lc = self.acquire()?;
        if lc.state == ResourceState::Unloaded {
            return Ok(self.report("Model already unloaded"));
        }

        let engine = lc.local.take();
        lc.state = ResourceState::Unloaded;
        lc.error = None;
        lc.config = None;
        lc.restart_config = None;
        lc.plan = None;
        self.publish(&lc);

        self.release(engine).await;
        info!("Model unloaded");
        Ok(self.report("Model unloaded successfully"))
    }

    /// Unload and load again with the last successfully loaded configuration,
    /// without releasing the lifecycle lock in between.
    #[instrument(name = "coordinator.restart", skip(self))]
    pub async fn restart(&self) -> Result<OpReport, CoordinatorError> {
        let mut lc = self.acquire()?;
        let Some(config) = lc.restart_config.clone() else {
            return Err(CoordinatorError::Precondition(
                "No model configuration available. Please load a model first.".to_string(),
            ));
        };

        info!(backbone = %config.backbone, "Restarting model");
        let engine = lc.local.take();
        lc.state = ResourceState::Loading;
        lc.error = None;
        lc.plan = None;
        self.publish(&lc);
        self.release(engine).await;

        let plan = self.load_locked(&mut lc, config).await?;
        Ok(self.report(format!("Model restarted successfully ({} backend)", plan.variant)))
    }

    /// Connect to a remote delegate after a successful health probe.
    ///
    /// The probe runs without holding the lifecycle lock. On failure any
    /// existing connection is left as it was.
    #[instrument(name = "coordinator.connect_remote", skip(self, credential))]
    pub async fn connect_remote(&self, endpoint: &str, credential: &str) -> Result<OpReport, CoordinatorError> {
        // Reject early when a mutation is already running.
        drop(self.acquire()?);

        let delegate = self
            .connector
            .connect(endpoint, credential)
            .map_err(|e| CoordinatorError::RemoteUnhealthy(e.to_string()))?;

        let report = self.probe(delegate.as_ref()).await;
        if !report.ok {
            warn!(reason = %report.reason(), "Remote health check failed");
            return Err(CoordinatorError::RemoteUnhealthy(format!(
                "Health check failed for {}: {}",
                delegate.endpoint(),
                report.reason()
            )));
        }

        let mut lc = self.acquire()?;
        let endpoint = delegate.endpoint().to_string();
        if let Some(previous) = &lc.remote {
            debug!(previous = %previous.health.lock().endpoint, "Replacing remote connection");
        }
        lc.remote = Some(RemoteLink {
            health: Arc::new(SyncMutex::new(RemoteHealth {
                endpoint: endpoint.clone(),
                healthy: true,
                payload: report.payload,
                checked_at: Utc::now(),
            })),
            delegate,
        });
        self.publish(&lc);

        info!("Connected to remote backend");
        Ok(self.report(format!("Connected to remote backend at {endpoint}")))
    }

    /// Drop the remote connection. Remote mode falls back to local.
    #[instrument(name = "coordinator.disconnect_remote", skip(self))]
    pub async fn disconnect_remote(&self) -> Result<OpReport, CoordinatorError> {
        let mut lc = self.acquire()?;
        let Some(link) = lc.remote.take() else {
            return Ok(self.report("No remote backend connected"));
        };

        let mut message = format!("Disconnected from remote backend at {}", link.health.lock().endpoint);
        if lc.mode == BackendMode::Remote {
            lc.mode = BackendMode::Local;
            message.push_str("; switched to local backend");
            info!("Backend mode reverted to local");
        }
        self.publish(&lc);
        Ok(self.report(message))
    }

    /// Select the serving path.
    ///
    /// Remote requires a connection whose last probe succeeded. Local is always
    /// accepted; until a model is loaded `get_handle` returns `None`.
    #[instrument(name = "coordinator.set_backend_mode", skip(self))]
    pub async fn set_backend_mode(&self, mode: BackendMode) -> Result<OpReport, CoordinatorError> {
        let mut lc = self.acquire()?;
        if mode == BackendMode::Remote {
            match &lc.remote {
                None => {
                    return Err(CoordinatorError::Precondition(
                        "No remote backend connected. Connect to a remote endpoint first.".to_string(),
                    ))
                }
                Some(link) => {
                    let health = link.health.lock();
                    if !health.healthy {
                        return Err(CoordinatorError::RemoteUnhealthy(format!(
                            "Remote backend at {} failed its last health check",
                            health.endpoint
                        )));
                    }
                }
            }
        }

        if lc.mode == mode {
            return Ok(self.report(format!("Backend mode is already {mode}")));
        }

        lc.mode = mode;
        self.publish(&lc);
        info!(%mode, "Backend mode changed");

        let message = match mode {
            BackendMode::Remote => "Switched to remote backend".to_string(),
            BackendMode::Local if lc.state == ResourceState::Loaded => "Switched to local backend".to_string(),
            BackendMode::Local => "Switched to local backend; no local model is loaded yet".to_string(),
        };
        Ok(self.report(message))
    }

    /// Re-probe the connected remote delegate and record the result.
    ///
    /// Returns `None` when there is no connection, or when it was replaced
    /// while the probe ran. An unhealthy delegate stops being served until a
    /// later probe succeeds. Never takes the lifecycle lock, so it neither
    /// waits for nor blocks a load.
    pub async fn refresh_remote_health(&self) -> Option<bool> {
        let probed = self.published.read().link.clone()?;
        let report = self.probe(probed.delegate.as_ref()).await;

        let mut published = self.published.write();
        let link = published.link.as_ref().filter(|link| link.is_same(&probed))?;
        let mut health = link.health.lock();

        let was_healthy = health.healthy;
        health.healthy = report.ok;
        health.payload = report.payload;
        health.checked_at = Utc::now();

        match (was_healthy, health.healthy) {
            (true, false) => warn!(endpoint = %health.endpoint, "Remote backend became unhealthy"),
            (false, true) => info!(endpoint = %health.endpoint, "Remote backend recovered"),
            _ => debug!(endpoint = %health.endpoint, healthy = health.healthy, "Remote health refreshed"),
        }

        let healthy = health.healthy;
        let mut snapshot = StatusSnapshot::clone(&published.snapshot);
        snapshot.remote = Some(health.clone());
        drop(health);
        snapshot.voices = self.voice_filter(&snapshot);
        snapshot.updated_at = Utc::now();
        published.snapshot = Arc::new(snapshot);
        Some(healthy)
    }

    fn acquire(&self) -> Result<MutexGuard<'_, Lifecycle>, CoordinatorError> {
        self.lifecycle.try_lock().map_err(|_| {
            let message = if self.status().state == ResourceState::Loading {
                "Model is currently loading. Please wait."
            } else {
                "Another lifecycle operation is in progress. Please wait."
            };
            debug!("Rejected lifecycle operation: busy");
            CoordinatorError::Busy(message.to_string())
        })
    }

    /// Construct the local resource. Caller holds the lifecycle lock.
    async fn load_locked(&self, lc: &mut Lifecycle, config: ResourceConfig) -> Result<LoadPlan, CoordinatorError> {
        let plan = classify(&config, self.devices.gpu_available());
        info!(
            variant = %plan.variant,
            backbone_device = %plan.backbone_device,
            codec_device = %plan.codec_device,
            "Loading model"
        );

        lc.state = ResourceState::Loading;
        lc.error = None;
        lc.plan = None;
        lc.config = Some(config.clone());
        self.publish(lc);

        let started = Instant::now();
        match self.factory.construct(&config, &plan).await {
            Ok(engine) => {
                lc.local = Some(engine);
                lc.plan = Some(plan);
                lc.state = ResourceState::Loaded;
                lc.restart_config = Some(config);
                self.publish(lc);
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Model loaded");
                Ok(plan)
            }
            Err(err) => {
                let mut diagnostic = format!("{err:#}");
                if diagnostic.trim().is_empty() {
                    diagnostic = "resource construction failed".to_string();
                }
                error!(error = %diagnostic, "Model load failed");
                lc.local = None;
                lc.config = None;
                lc.state = ResourceState::Error;
                lc.error = Some(diagnostic.clone());
                self.publish(lc);
                Err(CoordinatorError::Construction(diagnostic))
            }
        }
    }

    /// Tear down a released engine and reclaim device memory.
    async fn release(&self, engine: Option<Arc<dyn LocalEngine>>) {
        if let Some(engine) = engine {
            if engine.has_teardown() {
                if let Err(err) = engine.teardown().await {
                    warn!(error = %err, "Teardown failed, dropping resource anyway");
                }
            }
            let outstanding = Arc::strong_count(&engine) - 1;
            if outstanding > 0 {
                debug!(outstanding, "Resource still referenced by in-flight requests");
            }
        }
        self.devices.reclaim();
    }

    async fn probe(&self, delegate: &dyn RemoteDelegate) -> HealthReport {
        match tokio::time::timeout(self.options.probe_timeout, delegate.health_check()).await {
            Ok(report) => report,
            Err(_) => HealthReport::failed(format!(
                "health check timed out after {}s",
                self.options.probe_timeout.as_secs_f32()
            )),
        }
    }

    /// Publish a snapshot of `lc`. Caller holds the lifecycle lock.
    fn publish(&self, lc: &Lifecycle) {
        assert!(
            lc.state != ResourceState::Loaded || (lc.local.is_some() && lc.plan.is_some()),
            "coordinator invariant violated: state is loaded without a local resource"
        );
        assert!(
            lc.state != ResourceState::Error || lc.error.as_deref().is_some_and(|e| !e.is_empty()),
            "coordinator invariant violated: error state without a diagnostic"
        );

        // Health is read under the publish lock so a concurrent refresh cannot
        // be overwritten by a stale copy.
        let mut published = self.published.write();

        let local_loaded = lc.state == ResourceState::Loaded;
        let mut snapshot = StatusSnapshot {
            state: lc.state,
            error: lc.error.clone(),
            config: lc.config.clone(),
            plan: lc.plan,
            local_loaded,
            mode: lc.mode,
            remote: lc.remote.as_ref().map(|link| link.health.lock().clone()),
            voices: VoiceFilter::All,
            updated_at: Utc::now(),
        };
        snapshot.voices = self.voice_filter(&snapshot);

        let local = match (&lc.local, lc.plan) {
            (Some(engine), Some(plan)) if local_loaded => Some(Handle::local(Arc::clone(engine), plan)),
            _ => None,
        };
        let remote = lc
            .remote
            .as_ref()
            .map(|link| Handle::remote(Arc::clone(&link.delegate)));

        *published = Published {
            snapshot: Arc::new(snapshot),
            local,
            remote,
            link: lc.remote.clone(),
        };
    }

    fn voice_filter(&self, snapshot: &StatusSnapshot) -> VoiceFilter {
        if snapshot.serving_remote() {
            VoiceFilter::All
        } else {
            VoiceFilter::for_plan(snapshot.plan.as_ref(), &self.options.quantized_voices)
        }
    }

    fn report(&self, message: impl Into<String>) -> OpReport {
        OpReport {
            message: message.into(),
            status: self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::engine::{StaticDevices, Synthesizer, VoiceReference};
    use crate::error::{RemoteError, SynthesisError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Engine;

    #[async_trait]
    impl Synthesizer for Engine {
        async fn infer(&self, _: &str, _: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
            Ok(AudioBuffer::new(vec![0.0; 8], 24_000))
        }
    }

    impl LocalEngine for Engine {}

    /// Fails every construction after the first `succeed` calls.
    struct Factory {
        calls: AtomicUsize,
        succeed: usize,
    }

    #[async_trait]
    impl ResourceFactory for Factory {
        async fn construct(&self, _: &ResourceConfig, _: &LoadPlan) -> anyhow::Result<Arc<dyn LocalEngine>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed {
                Ok(Arc::new(Engine))
            } else {
                anyhow::bail!("weights missing")
            }
        }
    }

    struct Delegate {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Synthesizer for Delegate {
        async fn infer(&self, _: &str, _: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
            Ok(AudioBuffer::new(vec![0.0; 4], 24_000))
        }
    }

    #[async_trait]
    impl RemoteDelegate for Delegate {
        fn endpoint(&self) -> &str {
            "https://remote.test"
        }

        async fn health_check(&self) -> HealthReport {
            if self.healthy.load(Ordering::SeqCst) {
                HealthReport::from_payload(serde_json::json!({"status": "ok"}))
            } else {
                HealthReport::failed("down")
            }
        }
    }

    struct Connector {
        healthy: Arc<AtomicBool>,
    }

    impl RemoteConnector for Connector {
        fn connect(&self, _: &str, _: &str) -> Result<Arc<dyn RemoteDelegate>, RemoteError> {
            Ok(Arc::new(Delegate {
                healthy: Arc::clone(&self.healthy),
            }))
        }
    }

    fn coordinator(succeed: usize, healthy: Arc<AtomicBool>) -> Coordinator {
        Coordinator::with_options(
            Arc::new(Factory {
                calls: AtomicUsize::new(0),
                succeed,
            }),
            Arc::new(StaticDevices { gpu: false }),
            Arc::new(Connector { healthy }),
            CoordinatorOptions {
                probe_timeout: Duration::from_secs(1),
                quantized_voices: vec!["Binh".into()],
            },
        )
    }

    #[tokio::test]
    async fn failed_load_records_diagnostic_and_no_handle() {
        let coordinator = coordinator(0, Arc::new(AtomicBool::new(true)));
        let err = coordinator.load(ResourceConfig::new("org/tts", "org/codec")).await.unwrap_err();
        assert_eq!(err, CoordinatorError::Construction("weights missing".into()));

        let status = coordinator.status();
        assert_eq!(status.state, ResourceState::Error);
        assert_eq!(status.error.as_deref(), Some("weights missing"));
        assert!(status.config.is_none());
        assert!(coordinator.get_handle().is_none());
    }

    #[tokio::test]
    async fn failed_restart_can_be_retried() {
        let coordinator = coordinator(1, Arc::new(AtomicBool::new(true)));
        coordinator.load(ResourceConfig::new("org/tts", "org/codec")).await.unwrap();

        let err = coordinator.restart().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Construction(_)));
        assert_eq!(coordinator.status().state, ResourceState::Error);

        // The last good configuration survives the failed attempt.
        let err = coordinator.restart().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Construction(_)));
    }

    #[tokio::test]
    async fn quantized_plan_constrains_voices() {
        let coordinator = coordinator(1, Arc::new(AtomicBool::new(true)));
        coordinator
            .load(ResourceConfig::new("org/tts-q4-gguf", "org/codec"))
            .await
            .unwrap();
        assert_eq!(coordinator.status().voices, VoiceFilter::Only(vec!["Binh".into()]));
    }

    #[tokio::test]
    async fn unhealthy_remote_falls_back_to_local() {
        let healthy = Arc::new(AtomicBool::new(true));
        let coordinator = coordinator(1, Arc::clone(&healthy));
        coordinator.load(ResourceConfig::new("org/tts", "org/codec")).await.unwrap();
        coordinator.connect_remote("https://remote.test", "secret").await.unwrap();
        coordinator.set_backend_mode(BackendMode::Remote).await.unwrap();
        assert!(coordinator.get_handle().unwrap().is_remote());

        healthy.store(false, Ordering::SeqCst);
        assert_eq!(coordinator.refresh_remote_health().await, Some(false));
        let handle = coordinator.get_handle().unwrap();
        assert!(!handle.is_remote());
        assert_eq!(coordinator.status().mode, BackendMode::Remote);

        let err = coordinator.set_backend_mode(BackendMode::Remote).await.unwrap_err();
        assert_eq!(err.kind(), "remote_unhealthy");

        healthy.store(true, Ordering::SeqCst);
        assert_eq!(coordinator.refresh_remote_health().await, Some(true));
        assert!(coordinator.get_handle().unwrap().is_remote());
    }

    #[tokio::test]
    async fn refresh_without_connection_is_none() {
        let coordinator = coordinator(0, Arc::new(AtomicBool::new(true)));
        assert_eq!(coordinator.refresh_remote_health().await, None);
    }
}
