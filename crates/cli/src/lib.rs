//! `geoengine` command-line interface.
//!
//! The binary is a thin wrapper around [`run`]; the command handlers take a
//! [`context::CliContext`] so they can be driven against a scratch home and
//! a fake container runtime in tests.

pub mod cli;
pub mod commands;
pub mod context;
pub mod logging;

use std::process::ExitCode;

use cli::{Cli, Command};
use context::CliContext;

/// Exit code when a run is interrupted with Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Dispatch a parsed command line.
pub async fn run(cli: Cli, ctx: &CliContext) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Init(args) => commands::worker::init(ctx, &args),
        Command::Apply(args) => commands::worker::apply(ctx, &args),
        Command::Delete(args) => commands::worker::delete(ctx, &args),
        Command::Workers(args) => commands::worker::list(ctx, &args),
        Command::Describe(args) => commands::worker::describe(ctx, &args),
        Command::Diff(args) => commands::worker::diff(ctx, &args),
        Command::Build(args) => commands::build::build(ctx, &args).await,
        Command::Run(args) => commands::run::run(ctx, &args).await,
        Command::Serve(args) => commands::serve::serve(ctx, &args).await,
        Command::Image(command) => commands::image::image(ctx, command).await,
    }
}
