//! `geoengine build`

use std::process::ExitCode;

use geoengine_core::build::{
    build_worker, parse_build_args, BuildDecision, BuildOptions, BuildReport, RebuildReason,
};

use crate::cli::BuildArgs;
use crate::context::CliContext;

/// Decide whether the worker needs a new image and build it if so.
pub async fn build_image(ctx: &CliContext, args: &BuildArgs) -> anyhow::Result<BuildReport> {
    let dir = ctx.worker_dir(args.target.worker.as_deref())?;
    let options = BuildOptions {
        no_cache: args.no_cache,
        dev: args.dev,
        build_args: parse_build_args(&args.build_args)?,
    };
    let report = build_worker(ctx.runtime.as_ref(), &ctx.records, &dir, &options).await?;
    tracing::info!(
        worker = %report.worker,
        image = %report.image_tag,
        built = report.built,
        "Build finished"
    );
    Ok(report)
}

pub async fn build(ctx: &CliContext, args: &BuildArgs) -> anyhow::Result<ExitCode> {
    let report = build_image(ctx, args).await?;
    match &report.decision {
        BuildDecision::Rebuild(reason) => {
            let why = match reason {
                RebuildReason::Forced => "forced",
                RebuildReason::FirstBuild => "first build",
                RebuildReason::VersionBumped => "version bumped",
                RebuildReason::ContentChanged => "content changed",
            };
            println!("Built {} ({why})", report.image_tag);
        }
        BuildDecision::NoChange => {
            println!(
                "No changes detected for worker '{}'; {} is up to date",
                report.worker, report.image_tag
            );
        }
        BuildDecision::SkipWithNotice { previous, current } => {
            println!(
                "Version changed from {} to {current} but no tracked files changed; tagged {} without rebuilding",
                previous.as_deref().unwrap_or("(none)"),
                report.image_tag
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::WorkerTarget;
    use crate::commands::testing::{write_manifest, Sandbox};
    use assert_matches::assert_matches;
    use geoengine_core::error::{BuildError, CoreError};
    use geoengine_core::runtime::ContainerRuntime;

    fn args(no_cache: bool, dev: bool) -> BuildArgs {
        BuildArgs {
            target: WorkerTarget { worker: None },
            no_cache,
            dev,
            build_args: vec!["GDAL=3.8".into()],
        }
    }

    #[tokio::test]
    async fn first_build_then_no_change() {
        let sandbox = Sandbox::new();
        let dir = sandbox.worker("ndvi", "ndvi", "1.0.0");
        let ctx = sandbox.ctx(&dir);

        let report = build_image(&ctx, &args(false, false)).await.unwrap();
        assert_eq!(report.decision, BuildDecision::Rebuild(RebuildReason::FirstBuild));
        assert_eq!(report.image_tag, "geoengine-local/ndvi:1.0.0");
        {
            let builds = sandbox.runtime.builds.lock().unwrap();
            assert_eq!(builds.len(), 1);
            assert_eq!(builds[0].args.get("GDAL").map(String::as_str), Some("3.8"));
        }
        assert!(sandbox.runtime.image_exists("geoengine-local/ndvi:1.0.0").await.unwrap());

        let report = build_image(&ctx, &args(false, false)).await.unwrap();
        assert_eq!(report.decision, BuildDecision::NoChange);
        assert_eq!(sandbox.runtime.builds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_script_without_bump_is_rejected_outside_dev() {
        let sandbox = Sandbox::new();
        let dir = sandbox.worker("ndvi", "ndvi", "1.0.0");
        let ctx = sandbox.ctx(&dir);
        build_image(&ctx, &args(false, false)).await.unwrap();

        std::fs::write(dir.join("run.sh"), "echo changed\n").unwrap();
        let err = build_image(&ctx, &args(false, false)).await.unwrap_err();
        assert_matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Build(BuildError::VersionNotBumped { .. }))
        );

        let report = build_image(&ctx, &args(false, true)).await.unwrap();
        assert_eq!(report.image_tag, "geoengine-local-dev/ndvi:latest");
        assert!(report.built);

        write_manifest(&dir, "ndvi", "1.1.0");
        let report = build_image(&ctx, &args(false, false)).await.unwrap();
        assert_eq!(report.decision, BuildDecision::Rebuild(RebuildReason::VersionBumped));
    }

    #[tokio::test]
    async fn version_only_bump_retags() {
        let sandbox = Sandbox::new();
        let dir = sandbox.worker("ndvi", "ndvi", "1.0.0");
        let ctx = sandbox.ctx(&dir);
        build_image(&ctx, &args(false, false)).await.unwrap();

        // The version line is not a build-relevant field.
        write_manifest(&dir, "ndvi", "1.0.1");
        let report = build_image(&ctx, &args(false, false)).await.unwrap();
        assert_matches!(report.decision, BuildDecision::SkipWithNotice { .. });
        assert_eq!(
            sandbox.runtime.calls(),
            ["tag geoengine-local/ndvi:1.0.0 geoengine-local/ndvi:1.0.1"]
        );
    }

    #[tokio::test]
    async fn no_cache_always_rebuilds() {
        let sandbox = Sandbox::new();
        let dir = sandbox.worker("ndvi", "ndvi", "1.0.0");
        let ctx = sandbox.ctx(&dir);
        build_image(&ctx, &args(false, false)).await.unwrap();

        let report = build_image(&ctx, &args(true, false)).await.unwrap();
        assert_eq!(report.decision, BuildDecision::Rebuild(RebuildReason::Forced));
        assert!(sandbox.runtime.builds.lock().unwrap()[1].no_cache);
    }

    #[tokio::test]
    async fn malformed_build_arg_fails_before_building() {
        let sandbox = Sandbox::new();
        let dir = sandbox.worker("ndvi", "ndvi", "1.0.0");
        let ctx = sandbox.ctx(&dir);
        let mut bad = args(false, false);
        bad.build_args = vec!["NOEQUALS".into()];

        let err = build_image(&ctx, &bad).await.unwrap_err();
        assert_matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MalformedBuildArg(raw)) if raw == "NOEQUALS"
        );
        assert!(sandbox.runtime.builds.lock().unwrap().is_empty());
    }
}
