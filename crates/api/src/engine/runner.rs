//! Bridges queued jobs to the container executor.

use std::path::PathBuf;

use async_trait::async_trait;
use geoengine_core::build::image_tag;
use geoengine_core::error::CoreError;
use geoengine_core::executor::{ExecutionOutcome, JobExecutor, LogSink};
use geoengine_core::job::{Job, JobRequest};
use geoengine_core::manifest::WorkerManifest;
use geoengine_core::mapping;
use geoengine_core::runtime::ContainerSpec;
use geoengine_core::settings::SettingsStore;
use tokio_util::sync::CancellationToken;

use super::load_registered_worker;

/// Validates submissions and runs admitted jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Reject a submission before it is queued.
    async fn validate(&self, request: &JobRequest) -> Result<(), CoreError>;

    /// Run an admitted job to completion or cancellation.
    async fn run(
        &self,
        job: &Job,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, CoreError>;
}

/// Runs jobs as containers of registered workers.
pub struct ContainerJobRunner {
    settings: SettingsStore,
    executor: JobExecutor,
}

impl ContainerJobRunner {
    pub fn new(settings: SettingsStore, executor: JobExecutor) -> Self {
        Self { settings, executor }
    }

    async fn load_worker(&self, worker: &str) -> Result<(PathBuf, WorkerManifest), CoreError> {
        load_registered_worker(&self.settings, worker).await
    }
}

#[async_trait]
impl JobRunner for ContainerJobRunner {
    async fn validate(&self, request: &JobRequest) -> Result<(), CoreError> {
        if let Some(dir) = request.output_dir.as_deref().filter(|d| !d.is_absolute()) {
            return Err(CoreError::Validation(format!(
                "output_dir must be an absolute path, got '{}'",
                dir.display()
            )));
        }
        let (_, manifest) = self.load_worker(&request.worker).await?;
        if let Some(tool) = request.tool.as_deref().filter(|t| *t != manifest.name) {
            return Err(CoreError::NotFound {
                entity: "Tool",
                id: format!("{}/{tool}", request.worker),
            });
        }
        mapping::validate_inputs(&manifest, &request.string_inputs())?;
        Ok(())
    }

    async fn run(
        &self,
        job: &Job,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, CoreError> {
        let (dir, manifest) = self.load_worker(&job.worker).await?;
        let mut invocation = mapping::resolve(&manifest, &dir, &job.inputs, &[])?;
        if let Some(output_dir) = &job.output_dir {
            invocation = invocation.with_output_dir(output_dir);
        }

        let image = image_tag(&manifest.name, manifest.version.as_deref(), false);
        let spec = ContainerSpec::new(image, invocation).with_name(format!("geoengine-job-{}", job.id));
        Ok(self.executor.execute(&spec, sink, cancel).await?)
    }
}
