use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use super::commands::{LoggingConfig, NotebookArgs, RemoteAction, UsersAction};
use crate::auth::{hash_password, UserStore};
use crate::config::{LoggingSettings, ServiceConfig};
use crate::engine::{DeviceHint, DEFAULT_MAX_BATCH_SIZE};
use crate::remote::{NotebookGenerator, NotebookParams};
use crate::server::{self, state::AppState};

const DEFAULT_FILTER: &str = "voxgate_core=info";

/// Install the global subscriber: stdout, plus a daily-rotated file when
/// `logging.file` is configured. Keep the returned guard alive until exit.
pub fn init_logging(cli: &LoggingConfig, settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let level = cli.get_effective_level(settings.level.as_deref());
    let directives = cli
        .log_filter
        .as_deref()
        .or(settings.filter.as_deref())
        .unwrap_or(DEFAULT_FILTER);
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(level.parse().unwrap_or(Level::INFO).into())
            .parse_lossy(directives)
    };

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
            let name = path.file_name().context("logging.file must name a file")?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter());

    let subscriber = tracing_subscriber::registry().with(stdout_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context("Failed to initialize tracing subscriber")?;
    LogTracer::init().context("Failed to initialize log tracer")?;

    Ok(guard)
}

pub async fn handle_serve(config: ServiceConfig) -> Result<()> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        remote = config.remote.auto_connect(),
        "voxgate starting up"
    );
    let state = AppState::from_config(config)?;
    server::start_server(state).await
}

pub fn handle_users(config: &ServiceConfig, action: UsersAction) -> Result<()> {
    let store = UserStore::open(&config.auth.users_file, config.auth.min_user_password_len)
        .with_context(|| format!("Failed to open users file {}", config.auth.users_file.display()))?
        .with_hash_cost(config.auth.password_hash_cost);

    match action {
        UsersAction::List => {
            println!(
                "Access control: {}",
                if store.is_access_enabled() { "enabled" } else { "disabled" }
            );
            for user in store.list() {
                println!(
                    "{:<24} {:<9} created {}",
                    user.username,
                    if user.enabled { "enabled" } else { "disabled" },
                    user.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        UsersAction::Add { username, password } => {
            store.add(&username, &password)?;
            println!("Added user '{username}'");
        }
        UsersAction::Remove { username } => {
            store.remove(&username)?;
            println!("Removed user '{username}'");
        }
        UsersAction::Enable { username } => {
            store.set_enabled(&username, true)?;
            println!("Enabled user '{username}'");
        }
        UsersAction::Disable { username } => {
            store.set_enabled(&username, false)?;
            println!("Disabled user '{username}'");
        }
        UsersAction::Access { state } => {
            let enabled = state == "on";
            store.set_access_enabled(enabled)?;
            println!("Access control {}", if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}

pub fn handle_remote(config: &ServiceConfig, action: RemoteAction) -> Result<()> {
    match action {
        RemoteAction::Notebook(args) => {
            let output = args.output.clone();
            let token = write_notebook(config, args)?;
            if let Some(path) = output {
                eprintln!("Wrote notebook to {}", path.display());
            }
            eprintln!("Remote auth token: {token}");
            eprintln!("Set remote.endpoint_url to the URL the notebook prints and remote.auth_token to this token.");
        }
    }
    Ok(())
}

/// Fill the notebook template and write it out. Returns the auth token.
fn write_notebook(config: &ServiceConfig, args: NotebookArgs) -> Result<String> {
    let backbone = args.backbone.as_deref().unwrap_or(&config.engine.default_backbone);
    let codec = args.codec.as_deref().unwrap_or(&config.engine.default_codec);
    let device = DeviceHint::from_label(&args.device);
    let resource = config.resource_config(backbone, codec, device, true, DEFAULT_MAX_BATCH_SIZE)?;

    let generator = match &args.template {
        Some(path) => NotebookGenerator::from_path(path)?,
        None => NotebookGenerator::builtin()?,
    };
    let generated = generator.generate(&NotebookParams {
        backbone_repo: resource.backbone,
        codec_repo: resource.codec,
        device,
        auth_token: args.auth_token,
    })?;

    match &args.output {
        Some(path) => std::fs::write(path, &generated.notebook)
            .with_context(|| format!("Failed to write notebook to {}", path.display()))?,
        None => println!("{}", generated.notebook),
    }
    info!(backbone = %backbone, codec = %codec, device = %device, "Generated remote backend notebook");
    Ok(generated.auth_token)
}

pub fn handle_hash_password(password: &str) -> Result<()> {
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    println!("{}", hash_password(password)?);
    Ok(())
}
