use std::process::ExitCode;

use clap::Parser;
use geoengine_cli::cli::Cli;
use geoengine_cli::context::CliContext;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    geoengine_cli::logging::init(cli.verbose);

    let result = match CliContext::from_env() {
        Ok(ctx) => geoengine_cli::run(cli, &ctx).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
