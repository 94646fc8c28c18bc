//! `geoengine run`

use std::path::PathBuf;
use std::process::ExitCode;

use geoengine_core::build::image_tag;
use geoengine_core::executor::{
    ExecutionOutcome, JobExecutor, LogLine, LogSink, LogStream, OutputFile,
};
use geoengine_core::mapping::{self, parse_input_pairs};
use geoengine_core::runtime::ContainerSpec;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::print_json;
use crate::cli::RunArgs;
use crate::context::CliContext;
use crate::EXIT_INTERRUPTED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Printed on stdout by `run --json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub files: Vec<OutputFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolve the invocation and run it to completion or cancellation.
///
/// Inputs are validated and mapped before any container is started. A
/// non-zero exit is a `Failed` result, not an error.
pub async fn run_worker(
    ctx: &CliContext,
    args: &RunArgs,
    sink: LogSink,
    cancel: CancellationToken,
) -> anyhow::Result<RunResult> {
    let (dir, manifest) = ctx.load_worker(args.worker.as_deref())?;
    let inputs = parse_input_pairs(&args.inputs)?;
    let mut invocation = mapping::resolve(&manifest, &dir, &inputs, &args.args)?;
    if let Some(output_dir) = &args.output_dir {
        invocation = invocation.with_output_dir(&ctx.cwd.join(output_dir));
    }
    let output_dir = invocation.output_dir.clone();

    let image = image_tag(&manifest.name, manifest.version.as_deref(), args.dev);
    tracing::info!(worker = %manifest.name, %image, "Running worker");
    let spec = ContainerSpec::new(image, invocation);
    let executor = JobExecutor::new(ctx.runtime.clone());

    Ok(match executor.execute(&spec, sink, cancel).await? {
        ExecutionOutcome::Finished(result) => RunResult {
            status: if result.exit_code == 0 {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            exit_code: Some(result.exit_code),
            output_dir,
            error: (result.exit_code != 0)
                .then(|| format!("Container exited with code {}", result.exit_code)),
            files: result.files,
        },
        ExecutionOutcome::Cancelled => RunResult {
            status: RunStatus::Cancelled,
            exit_code: None,
            output_dir,
            files: Vec::new(),
            error: Some("Cancelled by user".into()),
        },
    })
}

/// Forward container output. With `--json` everything goes to stderr.
async fn print_logs(mut rx: mpsc::UnboundedReceiver<LogLine>, json: bool) {
    while let Some(LogLine { stream, line }) = rx.recv().await {
        match stream {
            LogStream::Stdout if !json => println!("{line}"),
            _ => eprintln!("{line}"),
        }
    }
}

pub async fn run(ctx: &CliContext, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping container");
                cancel.cancel();
            }
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_logs(rx, args.json));
    let outcome = run_worker(ctx, args, tx, cancel).await;
    interrupt.abort();
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Log printer task failed");
    }
    let result = outcome?;

    if args.json {
        print_json(&result)?;
    } else {
        match result.status {
            RunStatus::Completed => eprintln!("Completed successfully"),
            RunStatus::Failed => eprintln!(
                "Failed with exit code {}",
                result.exit_code.unwrap_or_default()
            ),
            RunStatus::Cancelled => eprintln!("Cancelled"),
        }
        for file in &result.files {
            eprintln!("  {} ({} bytes)", file.path.display(), file.size);
        }
    }

    Ok(match result.status {
        RunStatus::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
        RunStatus::Completed | RunStatus::Failed => ExitCode::SUCCESS,
    })
}
