//! Server state management

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::auth::{AdminSecret, SessionStore, UserStore};
use crate::config::ServiceConfig;
use crate::engine::{Coordinator, DeviceProbe, ProcessFactory, SystemDevices, VoiceFilter};

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    /// Owner of the synthesis resource and the local/remote routing
    pub coordinator: Arc<Coordinator>,

    /// Sessions for both the admin and the user surface
    pub sessions: Arc<SessionStore>,

    pub users: Arc<UserStore>,

    pub admin: Arc<AdminSecret>,

    /// Service configuration (catalogs, defaults, remote credentials)
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<Coordinator>,
        sessions: Arc<SessionStore>,
        users: Arc<UserStore>,
        admin: AdminSecret,
        config: ServiceConfig,
    ) -> Self {
        Self {
            coordinator,
            sessions,
            users,
            admin: Arc::new(admin),
            config: Arc::new(config),
        }
    }

    /// Wire up the production collaborators described by `config`.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let admin = AdminSecret::from_env(&config.auth.admin_password_env, config.auth.min_admin_password_len)
            .context("Administrator password is not usable")?;

        let sessions = Arc::new(SessionStore::new(config.session_timeout()));
        let users = UserStore::open(&config.auth.users_file, config.auth.min_user_password_len)
            .with_context(|| format!("Failed to open users file {}", config.auth.users_file.display()))?
            .with_hash_cost(config.auth.password_hash_cost)
            .with_sessions(Arc::clone(&sessions));

        let factory = match config.engine_command() {
            Some(command) => ProcessFactory::new(command),
            None => {
                tracing::warn!("engine.command is empty; local model loads will fail until it is configured");
                ProcessFactory::unconfigured()
            }
        };
        let devices: Arc<dyn DeviceProbe> = if config.cpu_only {
            Arc::new(SystemDevices::cpu_only())
        } else {
            Arc::new(SystemDevices::new())
        };

        let coordinator = Coordinator::with_options(
            Arc::new(factory),
            devices,
            Arc::new(config.remote_connector()),
            config.coordinator_options(),
        );

        Ok(Self::new(Arc::new(coordinator), sessions, Arc::new(users), admin, config))
    }

    /// Catalog voices `filter` lets through, in catalog order. Both the
    /// status routes and synthesis go through this list.
    pub fn offered_voices(&self, filter: &VoiceFilter) -> Vec<String> {
        filter.apply(&self.config.voice_names())
    }
}
