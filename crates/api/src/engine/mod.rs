//! Job execution engine.
//!
//! [`queue::JobQueue`] holds job state and admits jobs into a bounded pool;
//! [`runner::JobRunner`] turns an admitted job into a container run.

pub mod queue;
pub mod runner;

use std::path::PathBuf;

use geoengine_core::error::CoreError;
use geoengine_core::manifest::WorkerManifest;
use geoengine_core::settings::SettingsStore;

/// Run file-locking store access on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Task(e.to_string()))?
}

/// Directory and manifest of a registered worker.
pub async fn load_registered_worker(
    settings: &SettingsStore,
    name: &str,
) -> Result<(PathBuf, WorkerManifest), CoreError> {
    let settings = settings.clone();
    let name = name.to_string();
    blocking(move || {
        let dir = settings.load()?.registered_worker_path(&name)?;
        let manifest = WorkerManifest::load_from_dir(&dir)?;
        Ok((dir, manifest))
    })
    .await
}
