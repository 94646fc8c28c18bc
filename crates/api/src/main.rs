use std::process::ExitCode;
use std::sync::Arc;

use geoengine_api::config::ServerConfig;
use geoengine_api::server::{serve, shutdown_signal};
use geoengine_core::runtime::DockerRuntime;
use geoengine_core::settings::SettingsStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geoengine_api=info,geoengine_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let settings = SettingsStore::open_default().expect("Failed to locate GeoEngine home");
    let loaded = settings.load().expect("Failed to read settings");
    let config = match ServerConfig::from_env(&loaded) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid server configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        host = %config.host,
        port = config.port,
        settings = %settings.path().display(),
        "Loaded server configuration"
    );

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Docker");
            return ExitCode::FAILURE;
        }
    };

    // --- Start server ---
    if let Err(e) = serve(config, settings, Arc::new(runtime), shutdown_signal()).await {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
