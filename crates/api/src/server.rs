//! Server lifecycle: wire the queue to a container runtime, serve until a
//! shutdown signal arrives, then drain running jobs.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use geoengine_core::executor::JobExecutor;
use geoengine_core::runtime::ContainerRuntime;
use geoengine_core::settings::SettingsStore;

use crate::config::ServerConfig;
use crate::engine::queue::JobQueue;
use crate::engine::runner::ContainerJobRunner;
use crate::router::build_app_router;
use crate::state::AppState;

/// Build the shared state with a running job queue.
pub fn build_state(
    config: ServerConfig,
    settings: SettingsStore,
    runtime: Arc<dyn ContainerRuntime>,
) -> AppState {
    let runner = ContainerJobRunner::new(settings.clone(), JobExecutor::new(runtime));
    let queue = JobQueue::start(config.max_workers, Arc::new(runner));
    AppState {
        config: Arc::new(config),
        settings,
        queue,
        started_at: Instant::now(),
    }
}

/// Bind, serve until `shutdown` resolves, then cancel outstanding jobs.
///
/// Running containers get `shutdown_timeout_secs` to stop before the
/// function returns.
pub async fn serve<F>(
    config: ServerConfig,
    settings: SettingsStore,
    runtime: Arc<dyn ContainerRuntime>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let host: IpAddr = config.host.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid HOST address '{}': {e}", config.host),
        )
    })?;
    let addr = SocketAddr::new(host, config.port);
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    let state = build_state(config.clone(), settings, runtime);
    let queue = Arc::clone(&state.queue);
    let app = build_app_router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, max_workers = config.max_workers, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped accepting connections, cancelling jobs");
    queue.shutdown(grace).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
