use std::sync::Arc;
use std::time::Instant;

use geoengine_core::settings::SettingsStore;

use crate::config::ServerConfig;
use crate::engine::queue::JobQueue;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Worker registry, re-read on every request so `geoengine apply` is
    /// picked up without a restart.
    pub settings: SettingsStore,
    /// Job queue and worker pool.
    pub queue: Arc<JobQueue>,
    /// When the server started, for `uptime_seconds`.
    pub started_at: Instant,
}
