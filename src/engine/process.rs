//! Local engine hosted in a supervised worker process.
//!
//! The worker is any program that serves the remote synthesis protocol on
//! `127.0.0.1:{port}`. It is spawned on load, polled until `/health` reports
//! ready, and killed on teardown.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::factory::ResourceFactory;
use super::handle::{LocalEngine, Synthesizer, VoiceReference};
use super::selection::{EngineVariant, LoadPlan};
use super::types::ResourceConfig;
use crate::audio::AudioBuffer;
use crate::error::SynthesisError;
use crate::remote::{HttpConnector, RemoteClient, RetryPolicy};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable carrying the per-process bearer token.
pub const WORKER_TOKEN_ENV: &str = "VOXGATE_WORKER_TOKEN";

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub program: String,
    /// Arguments; `{backbone}`, `{codec}`, `{backbone_device}`,
    /// `{codec_device}`, `{variant}`, `{port}` and `{max_batch_size}` are
    /// substituted.
    pub args: Vec<String>,
    pub port: u16,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    pub env: HashMap<String, String>,
}

impl EngineCommand {
    pub fn expand_args(&self, config: &ResourceConfig, plan: &LoadPlan) -> Vec<String> {
        let port = self.port.to_string();
        let batch = config.max_batch_size.to_string();
        let backbone_device = plan.backbone_device.to_string();
        let codec_device = plan.codec_device.to_string();
        let variant = plan.variant.to_string();
        let triton = config.enable_triton.to_string();
        let substitutions: [(&str, &str); 8] = [
            ("{backbone}", &config.backbone),
            ("{codec}", &config.codec),
            ("{backbone_device}", &backbone_device),
            ("{codec_device}", &codec_device),
            ("{variant}", &variant),
            ("{port}", &port),
            ("{max_batch_size}", &batch),
            ("{enable_triton}", &triton),
        ];

        self.args
            .iter()
            .map(|arg| {
                substitutions
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

/// Spawns a worker per load.
#[derive(Debug, Clone)]
pub struct ProcessFactory {
    command: Option<EngineCommand>,
}

impl ProcessFactory {
    pub fn new(command: EngineCommand) -> Self {
        Self { command: Some(command) }
    }

    /// A factory that fails every load, for deployments that only serve
    /// through a remote backend.
    pub fn unconfigured() -> Self {
        Self { command: None }
    }
}

#[async_trait]
impl ResourceFactory for ProcessFactory {
    async fn construct(&self, config: &ResourceConfig, plan: &LoadPlan) -> anyhow::Result<Arc<dyn LocalEngine>> {
        let Some(command) = &self.command else {
            bail!("no local engine command configured (set engine.command)");
        };

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let args = command.expand_args(config, plan);

        debug!(program = %command.program, ?args, "Spawning engine worker");
        let mut cmd = Command::new(&command.program);
        cmd.args(&args)
            .envs(&command.env)
            .env(WORKER_TOKEN_ENV, &token)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine worker '{}'", command.program))?;
        let pid = child.id();
        info!(pid = ?pid, port = command.port, variant = %plan.variant, "Engine worker spawned");

        let connector = HttpConnector {
            timeout: command.request_timeout,
            health_timeout: HEALTH_POLL_INTERVAL.max(Duration::from_secs(2)),
            retry: RetryPolicy::none(),
            ..HttpConnector::default()
        };
        let client = connector.client(&format!("http://127.0.0.1:{}", command.port), &token)?;

        if let Err(err) = wait_until_healthy(&mut child, &client, command.startup_timeout).await {
            stop_child(&mut child).await;
            return Err(err);
        }

        info!(pid = ?pid, "Engine worker ready");
        Ok(Arc::new(ProcessEngine {
            client,
            variant: plan.variant,
            child: Mutex::new(Some(child)),
        }))
    }
}

async fn wait_until_healthy(child: &mut Child, client: &RemoteClient, timeout: Duration) -> anyhow::Result<()> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("failed to poll engine worker")? {
            return Err(anyhow!("engine worker exited during startup with {status}"));
        }
        let report = client.health().await;
        if report.ok {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(anyhow!(
                "engine worker not healthy after {}s: {}",
                timeout.as_secs(),
                report.reason()
            ));
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to send kill signal to engine worker");
    }
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(status = ?status, "Engine worker exited"),
        Ok(Err(e)) => warn!(error = %e, "Error waiting for engine worker"),
        Err(_) => warn!("Timeout waiting for engine worker, it will be killed on drop"),
    }
}

/// A running worker process.
pub struct ProcessEngine {
    client: RemoteClient,
    variant: EngineVariant,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl Synthesizer for ProcessEngine {
    async fn infer(&self, text: &str, reference: &VoiceReference) -> Result<AudioBuffer, SynthesisError> {
        self.client.synthesize(text, reference).await
    }

    fn supports_batch(&self) -> bool {
        self.variant.supports_batch()
    }
}

#[async_trait]
impl LocalEngine for ProcessEngine {
    fn has_teardown(&self) -> bool {
        true
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            stop_child(&mut child).await;
        }
        Ok(())
    }
}
