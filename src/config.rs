//! Configuration management for the voxgate service.
//!
//! Sources, in order of precedence (later sources override earlier ones):
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/voxgate/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (prefixed with `VOXGATE_`, nested keys separated
//!    by `__`, e.g. `VOXGATE_SERVER__PORT=8080`)
//! 5. Command-line arguments
//!
//! # Environment Variables
//!
//! - `VOXGATE_REMOTE__ENDPOINT_URL` / `VOXGATE_REMOTE__AUTH_TOKEN` - remote
//!   backend credentials; setting both enables the remote section
//! - `ADMIN_PASSWORD` - administrator password (name configurable through
//!   `auth.admin_password_env`)

use clap::Args;
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{CoordinatorOptions, DeviceHint, EngineCommand, ResourceConfig};
use crate::error::ConfigError;
use crate::remote::{HttpConnector, RetryPolicy};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const ENV_PREFIX: &str = "VOXGATE";

/// Command-line overrides shared by commands that need the configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, env = "VOXGATE_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Path of the users file
    #[arg(long)]
    pub users_file: Option<PathBuf>,

    /// Remote backend endpoint URL
    #[arg(long)]
    pub remote_endpoint: Option<String>,

    /// Ignore any GPU on this host
    #[arg(long)]
    pub cpu_only: bool,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub remote: RemoteSettings,
    pub engine: EngineSettings,
    #[serde(default)]
    pub text: TextSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Backbone catalog, in display order.
    #[serde(default)]
    pub backbones: Vec<ModelEntry>,
    #[serde(default)]
    pub codecs: Vec<ModelEntry>,
    #[serde(default)]
    pub voices: Vec<VoiceSample>,
    /// Set from `--cpu-only`; not read from files.
    #[serde(skip)]
    pub cpu_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_sweep_interval")]
    pub session_sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: u64,
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
    #[serde(default = "default_admin_password_env")]
    pub admin_password_env: String,
    #[serde(default = "default_min_admin_password_len")]
    pub min_admin_password_len: usize,
    #[serde(default = "default_min_user_password_len")]
    pub min_user_password_len: usize,
    /// Bcrypt work factor for stored user passwords.
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
}

/// Remote backend connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between background health probes; 0 disables them.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_true")]
    pub watermark: bool,
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("enabled", &self.enabled)
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &if self.auth_token.is_empty() { "" } else { "<redacted>" })
            .field("timeout_seconds", &self.timeout_seconds)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}

impl RemoteSettings {
    /// Both endpoint and token are present.
    pub fn is_valid(&self) -> bool {
        !self.endpoint_url.trim().is_empty() && !self.auth_token.is_empty()
    }

    /// Connect at startup.
    pub fn auto_connect(&self) -> bool {
        self.enabled && self.is_valid()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the worker, as `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default = "default_engine_port")]
    pub port: u16,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Load the default model at startup.
    #[serde(default)]
    pub auto_load: bool,
    #[serde(default)]
    pub default_backbone: String,
    #[serde(default)]
    pub default_codec: String,
    #[serde(default)]
    pub default_device: DeviceHint,
    /// Voices the quantized backbones are known to handle.
    #[serde(default)]
    pub quantized_voices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSettings {
    #[serde(default = "default_max_chars")]
    pub max_chars_per_chunk: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            max_chars_per_chunk: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when no CLI flag is given
    #[serde(default)]
    pub level: Option<String>,
    /// Extra `EnvFilter` directives
    #[serde(default)]
    pub filter: Option<String>,
    /// Write logs to this file (daily rotation) in addition to stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// A backbone or codec the operator may pick by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub description: String,
}

/// A preset voice: reference clip plus its transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSample {
    pub name: String,
    pub audio: PathBuf,
    pub text: PathBuf,
    #[serde(default)]
    pub description: String,
}

impl ServiceConfig {
    /// Load configuration from all sources
    pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::with_name("/etc/voxgate/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(environment());

        let mut config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.apply_args(args);
        config.enable_remote_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Embedded defaults only.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml(overrides: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from_str(overrides, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_args(&mut self, args: &ConfigArgs) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(path) = &args.users_file {
            self.auth.users_file = path.clone();
        }
        if let Some(endpoint) = &args.remote_endpoint {
            self.remote.endpoint_url = endpoint.clone();
        }
        self.cpu_only = args.cpu_only;
    }

    /// Credentials supplied through the environment switch the remote on.
    fn enable_remote_from_env(&mut self) {
        let from_env = std::env::var(format!("{ENV_PREFIX}_REMOTE__ENDPOINT_URL")).is_ok()
            && std::env::var(format!("{ENV_PREFIX}_REMOTE__AUTH_TOKEN")).is_ok();
        if from_env && self.remote.is_valid() {
            self.remote.enabled = true;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.text.max_chars_per_chunk == 0 {
            return Err(ConfigError::Invalid("text.max_chars_per_chunk must be positive".into()));
        }
        if self.auth.session_timeout_hours == 0 {
            return Err(ConfigError::Invalid("auth.session_timeout_hours must be positive".into()));
        }
        if !(4..=31).contains(&self.auth.password_hash_cost) {
            return Err(ConfigError::Invalid("auth.password_hash_cost must be between 4 and 31".into()));
        }
        if self.remote.enabled && !self.remote.is_valid() {
            return Err(ConfigError::Invalid(
                "remote.enabled requires remote.endpoint_url and remote.auth_token".into(),
            ));
        }
        Ok(())
    }

    pub fn backbone(&self, name: &str) -> Result<&ModelEntry, ConfigError> {
        find_entry(&self.backbones, name, "backbone")
    }

    pub fn codec(&self, name: &str) -> Result<&ModelEntry, ConfigError> {
        find_entry(&self.codecs, name, "codec")
    }

    pub fn voice(&self, name: &str) -> Result<&VoiceSample, ConfigError> {
        self.voices
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConfigError::UnknownCatalogEntry {
                kind: "voice",
                name: name.to_string(),
            })
    }

    pub fn voice_names(&self) -> Vec<String> {
        self.voices.iter().map(|v| v.name.clone()).collect()
    }

    /// Build a resource configuration from catalog names.
    ///
    /// Names absent from the catalog are accepted verbatim when they look
    /// like a repository id (`owner/model`).
    pub fn resource_config(
        &self,
        backbone: &str,
        codec: &str,
        device: DeviceHint,
        enable_triton: bool,
        max_batch_size: usize,
    ) -> Result<ResourceConfig, ConfigError> {
        let backbone = resolve_repo(&self.backbones, backbone, "backbone")?;
        let codec = resolve_repo(&self.codecs, codec, "codec")?;
        Ok(ResourceConfig::new(backbone, codec)
            .with_device(device)
            .with_batching(enable_triton, max_batch_size))
    }

    /// Resource configuration for `engine.auto_load`.
    pub fn default_resource_config(&self) -> Result<ResourceConfig, ConfigError> {
        self.resource_config(
            &self.engine.default_backbone,
            &self.engine.default_codec,
            self.engine.default_device,
            true,
            crate::engine::DEFAULT_MAX_BATCH_SIZE,
        )
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.session_timeout_hours.saturating_mul(3600))
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            probe_timeout: Duration::from_secs(self.remote.health_timeout_seconds.max(1)),
            quantized_voices: self.engine.quantized_voices.clone(),
        }
    }

    pub fn remote_connector(&self) -> HttpConnector {
        HttpConnector {
            timeout: Duration::from_secs(self.remote.timeout_seconds.max(1)),
            health_timeout: Duration::from_secs(self.remote.health_timeout_seconds.max(1)),
            retry: RetryPolicy {
                max_retries: self.remote.max_retries,
                ..RetryPolicy::default()
            },
            speed: self.remote.speed,
            watermark: self.remote.watermark,
        }
    }

    /// Worker command, when one is configured.
    pub fn engine_command(&self) -> Option<EngineCommand> {
        let program = self.engine.command.trim();
        if program.is_empty() {
            return None;
        }
        Some(EngineCommand {
            program: program.to_string(),
            args: self.engine.args.clone(),
            port: self.engine.port,
            startup_timeout: Duration::from_secs(self.engine.startup_timeout_seconds),
            request_timeout: Duration::from_secs(self.engine.request_timeout_seconds.max(1)),
            env: self
                .engine
                .env
                .iter()
                .filter_map(|entry| entry.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .collect(),
        })
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn find_entry<'a>(entries: &'a [ModelEntry], name: &str, kind: &'static str) -> Result<&'a ModelEntry, ConfigError> {
    entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| ConfigError::UnknownCatalogEntry {
            kind,
            name: name.to_string(),
        })
}

fn resolve_repo(entries: &[ModelEntry], name: &str, kind: &'static str) -> Result<String, ConfigError> {
    match find_entry(entries, name, kind) {
        Ok(entry) => Ok(entry.repo.clone()),
        Err(_) if name.contains('/') && !name.trim().is_empty() => Ok(name.trim().to_string()),
        Err(err) => Err(err),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_session_timeout_hours() -> u64 {
    24
}

fn default_users_file() -> PathBuf {
    PathBuf::from("config/users.json")
}

fn default_admin_password_env() -> String {
    "ADMIN_PASSWORD".to_string()
}

fn default_min_admin_password_len() -> usize {
    12
}

fn default_min_user_password_len() -> usize {
    8
}

fn default_password_hash_cost() -> u32 {
    crate::auth::DEFAULT_HASH_COST
}

fn default_remote_timeout() -> u64 {
    60
}

fn default_health_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_speed() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_engine_port() -> u16 {
    8765
}

fn default_startup_timeout() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_chars() -> usize {
    256
}
