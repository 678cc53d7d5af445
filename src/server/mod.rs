//! voxgate HTTP server
//!
//! This module provides:
//! - The administrator control plane at /admin (model lifecycle, remote
//!   backend, users, access control)
//! - The user request path at the root (login, status, synthesis)
//! - Background session sweeping and remote health probing

use anyhow::{Context, Result};
use axum::{middleware as axum_middleware, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub mod background;
pub mod middleware;
pub mod routes;
pub mod state;

use background::{RemoteHealthMonitor, SessionSweeper};
use state::AppState;

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(routes::user::create_router())
        .nest("/admin", routes::admin::create_router())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "voxgate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the HTTP server and its background tasks, returning on shutdown.
pub async fn start_server(state: AppState) -> Result<()> {
    let config = &state.config;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let sweeper = SessionSweeper::new(state.sessions.clone(), config.server.session_sweep_interval_seconds).start();
    let monitor = (config.remote.health_check_interval > 0)
        .then(|| RemoteHealthMonitor::new(state.coordinator.clone(), config.remote.health_check_interval).start());

    spawn_startup_tasks(&state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Starting voxgate server on {}", addr);
    info!("Admin API available at http://{}/admin", addr);

    axum::serve(listener, create_app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    if let Some(monitor) = monitor {
        monitor.abort();
    }

    // Stops a worker process, if one is running.
    if let Err(err) = state.coordinator.unload().await {
        warn!(error = %err, "Could not unload model during shutdown");
    }
    info!("Server stopped");
    Ok(())
}

/// Connect the configured remote and load the default model, without
/// delaying the listener. Run in sequence so neither sees the other as busy.
fn spawn_startup_tasks(state: &AppState) {
    let config = state.config.clone();
    let coordinator = state.coordinator.clone();
    if !config.remote.auto_connect() && !config.engine.auto_load {
        return;
    }

    tokio::spawn(async move {
        if config.remote.auto_connect() {
            match coordinator
                .connect_remote(&config.remote.endpoint_url, &config.remote.auth_token)
                .await
            {
                Ok(report) => info!("{}", report.message),
                Err(err) => warn!(error = %err, "Auto-connect to remote backend failed"),
            }
        }

        if config.engine.auto_load {
            let resource = match config.default_resource_config() {
                Ok(resource) => resource,
                Err(err) => {
                    error!(error = %err, "Default model configuration is invalid");
                    return;
                }
            };
            match coordinator.load(resource).await {
                Ok(report) => info!("{}", report.message),
                Err(err) => error!(error = %err, "Auto-load of default model failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
