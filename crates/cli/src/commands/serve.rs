//! `geoengine serve`

use std::process::ExitCode;

use anyhow::Context;
use geoengine_api::config::ServerConfig;
use geoengine_api::server::{serve as serve_api, shutdown_signal};

use crate::cli::ServeArgs;
use crate::context::CliContext;

/// Server configuration from the environment and settings, with flags on top.
pub fn server_config(ctx: &CliContext, args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let settings = ctx.settings.load()?;
    let mut config = ServerConfig::from_env(&settings)?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_workers) = args.max_workers {
        config.max_workers = max_workers;
    }
    Ok(config)
}

pub async fn serve(ctx: &CliContext, args: &ServeArgs) -> anyhow::Result<ExitCode> {
    let config = server_config(ctx, args)?;
    eprintln!("GeoEngine job service listening on http://{}:{}", config.host, config.port);
    serve_api(config, ctx.settings.clone(), ctx.runtime.clone(), shutdown_signal())
        .await
        .context("Job service failed")?;
    Ok(ExitCode::SUCCESS)
}
