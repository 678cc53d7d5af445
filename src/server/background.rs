//! Periodic background tasks: session sweeping and remote health probing.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::engine::Coordinator;

/// Removes expired sessions on a fixed interval.
pub struct SessionSweeper {
    sessions: Arc<SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionStore>, interval_secs: u64) -> Self {
        Self {
            sessions,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting session sweeper with interval: {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = self.sessions.sweep();
                debug!(removed, remaining = self.sessions.len(), "Session sweep finished");
            }
        })
    }
}

/// Re-probes the connected remote backend so a failing delegate stops
/// receiving traffic without operator action.
pub struct RemoteHealthMonitor {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl RemoteHealthMonitor {
    pub fn new(coordinator: Arc<Coordinator>, interval_secs: u64) -> Self {
        Self {
            coordinator,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting remote health monitor with interval: {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            interval.tick().await;

            let mut last = None;
            loop {
                interval.tick().await;
                let Some(healthy) = self.coordinator.refresh_remote_health().await else {
                    debug!("No remote backend to probe");
                    last = None;
                    continue;
                };
                if last.is_some_and(|was| was != healthy) {
                    if healthy {
                        info!("Remote backend recovered");
                    } else {
                        warn!("Remote backend became unhealthy; serving falls back to local");
                    }
                }
                last = Some(healthy);
            }
        })
    }
}
