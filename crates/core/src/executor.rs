//! Runs one container to completion, streaming its output.
//!
//! [`JobExecutor::execute`] checks the image and mounts, creates and
//! starts the container through the [`ContainerRuntime`], forwards every
//! output line to a log sink and returns the exit code with the files the
//! run produced. Cancellation stops and removes the container.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSpec};

/// Which stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of container output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Consumer of container output.
pub type LogSink = mpsc::UnboundedSender<LogLine>;

/// A file the job wrote into its output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Result of a container that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub exit_code: i32,
    pub files: Vec<OutputFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Finished(JobResult),
    Cancelled,
}

/// Executes containers through a [`ContainerRuntime`].
#[derive(Clone)]
pub struct JobExecutor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl JobExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Run `spec` until it exits or `cancel` fires.
    ///
    /// A non-zero exit code is a normal [`ExecutionOutcome::Finished`];
    /// errors are reserved for containers that could not be started. Once
    /// the container exists it is removed on every path.
    pub async fn execute(
        &self,
        spec: &ContainerSpec,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        self.preflight(spec).await?;

        let before = match &spec.output_dir {
            Some(dir) => snapshot(dir)?,
            None => BTreeSet::new(),
        };

        if cancel.is_cancelled() {
            return Ok(ExecutionOutcome::Cancelled);
        }

        tracing::info!(container = %spec.name, image = %spec.image, "Creating container");
        let id = self.runtime.create(spec).await?;

        if cancel.is_cancelled() {
            self.remove_quietly(&id).await;
            return Ok(ExecutionOutcome::Cancelled);
        }

        if let Err(e) = self.runtime.start(&id).await {
            self.remove_quietly(&id).await;
            return Err(e);
        }

        let logs = {
            let runtime = self.runtime.clone();
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = runtime.follow_logs(&id, sink).await {
                    tracing::warn!(container = %id, error = %e, "Log stream failed");
                }
            })
        };

        let exit_code = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            code = self.runtime.wait(&id) => Some(code),
        };

        let Some(exit_code) = exit_code else {
            tracing::info!(container = %spec.name, "Cancelling container");
            if let Err(e) = self.runtime.stop(&id).await {
                tracing::warn!(container = %spec.name, error = %e, "Failed to stop container");
            }
            self.remove_quietly(&id).await;
            logs.abort();
            return Ok(ExecutionOutcome::Cancelled);
        };

        let exit_code = match exit_code {
            Ok(code) => code,
            Err(e) => {
                logs.abort();
                self.remove_quietly(&id).await;
                return Err(e);
            }
        };
        let _ = logs.await;
        self.remove_quietly(&id).await;

        let exit_code = i32::try_from(exit_code).unwrap_or(-1);
        let files = match &spec.output_dir {
            Some(dir) => new_files(dir, &before)?,
            None => Vec::new(),
        };
        tracing::info!(container = %spec.name, exit_code, files = files.len(), "Container finished");

        Ok(ExecutionOutcome::Finished(JobResult { exit_code, files }))
    }

    async fn preflight(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        if !self.runtime.image_exists(&spec.image).await? {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        if let Some(dir) = &spec.output_dir {
            std::fs::create_dir_all(dir).map_err(|e| RuntimeError::InvalidMount {
                host_path: dir.clone(),
                reason: format!("cannot create output directory: {e}"),
            })?;
        }
        for mount in &spec.mounts {
            // Bare names are named volumes managed by the runtime.
            if mount.host_path.is_absolute() && !mount.host_path.exists() {
                return Err(RuntimeError::InvalidMount {
                    host_path: mount.host_path.clone(),
                    reason: "host path does not exist".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn remove_quietly(&self, id: &str) {
        if let Err(e) = self.runtime.remove(id).await {
            tracing::warn!(container = %id, error = %e, "Failed to remove container");
        }
    }
}

fn snapshot(dir: &Path) -> Result<BTreeSet<String>, RuntimeError> {
    if !dir.exists() {
        return Ok(BTreeSet::new());
    }
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Top-level regular files in `dir` that were not in `before`, sorted by name.
fn new_files(dir: &Path, before: &BTreeSet<String>) -> Result<Vec<OutputFile>, RuntimeError> {
    let after = snapshot(dir)?;
    let mut files = Vec::new();
    for name in after.difference(before) {
        let path = dir.join(name);
        let size = std::fs::metadata(&path)?.len();
        files.push(OutputFile {
            name: name.clone(),
            path,
            size,
        });
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mount;
    use crate::runtime::ProcessRuntime;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn shell_spec(script: &str, output_dir: Option<PathBuf>) -> ContainerSpec {
        ContainerSpec {
            name: "geoengine-test".into(),
            image: "test:latest".into(),
            args: vec!["sh".into(), "-c".into(), script.into()],
            mounts: Vec::new(),
            env: BTreeMap::new(),
            output_dir,
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<LogLine>) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn streams_lines_per_stream_in_order() {
        let runtime = Arc::new(ProcessRuntime::new());
        let executor = JobExecutor::new(runtime.clone());
        let (tx, rx) = mpsc::unbounded_channel();

        let outcome = executor
            .execute(
                &shell_spec("echo one; echo two; echo oops >&2; echo three", None),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_matches!(outcome, ExecutionOutcome::Finished(JobResult { exit_code: 0, .. }));
        let lines = collect(rx).await;
        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == LogStream::Stdout)
            .map(|l| l.line.as_str())
            .collect();
        assert_eq!(stdout, vec!["one", "two", "three"]);
        assert!(lines.contains(&LogLine {
            stream: LogStream::Stderr,
            line: "oops".into()
        }));
        assert_eq!(
            runtime.calls(),
            ["create geoengine-test", "start geoengine-test", "rm geoengine-test"]
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_result_not_an_error() {
        let executor = JobExecutor::new(Arc::new(ProcessRuntime::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = executor
            .execute(&shell_spec("exit 3", None), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(outcome, ExecutionOutcome::Finished(JobResult { exit_code: 3, .. }));
    }

    #[tokio::test]
    async fn reports_new_output_files_sorted() {
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("old.txt"), "stale").unwrap();
        let executor = JobExecutor::new(Arc::new(ProcessRuntime::new()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let script = format!(
            "printf abc > {dir}/b.tif; printf x > {dir}/a.csv; mkdir {dir}/sub",
            dir = out.path().display()
        );
        let outcome = executor
            .execute(&shell_spec(&script, Some(out.path().to_path_buf())), tx, CancellationToken::new())
            .await
            .unwrap();

        let ExecutionOutcome::Finished(result) = outcome else {
            panic!("expected a finished job");
        };
        let names: Vec<_> = result.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.tif"]);
        assert_eq!(result.files[1].size, 3);
    }

    #[tokio::test]
    async fn missing_image_fails_before_create() {
        let runtime = Arc::new(ProcessRuntime::new().with_missing_image("test:latest"));
        let executor = JobExecutor::new(runtime.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = executor
            .execute(&shell_spec("echo hi", None), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::ImageNotFound(image) if image == "test:latest");
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_mount_source_is_rejected() {
        let executor = JobExecutor::new(Arc::new(ProcessRuntime::new()));
        let mut spec = shell_spec("true", None);
        spec.mounts.push(Mount {
            host_path: PathBuf::from("/definitely/not/here"),
            container_path: "/data".into(),
            readonly: true,
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = executor.execute(&spec, tx, CancellationToken::new()).await.unwrap_err();
        assert_matches!(err, RuntimeError::InvalidMount { .. });
    }

    #[tokio::test]
    async fn start_failure_removes_the_created_container() {
        let runtime = Arc::new(ProcessRuntime::new());
        let executor = JobExecutor::new(runtime.clone());
        let mut spec = shell_spec("true", None);
        spec.args = vec!["geoengine-no-such-program".into()];
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = executor.execute(&spec, tx, CancellationToken::new()).await.unwrap_err();
        assert_matches!(err, RuntimeError::StartFailed(_));
        assert_eq!(
            runtime.calls(),
            ["create geoengine-test", "start geoengine-test", "rm geoengine-test"]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_and_removes_container() {
        let runtime = Arc::new(ProcessRuntime::new());
        let executor = JobExecutor::new(runtime.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = executor
            .execute(&shell_spec("sleep 30", None), tx, cancel)
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            runtime.calls(),
            [
                "create geoengine-test",
                "start geoengine-test",
                "stop geoengine-test",
                "rm geoengine-test"
            ]
        );
    }

    /// Fires the job's cancel token as the container starts, so a process
    /// that exits at once races the cancellation.
    struct CancelOnStart {
        inner: ProcessRuntime,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ContainerRuntime for CancelOnStart {
        async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
            self.inner.image_exists(image).await
        }
        async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
            self.inner.create(spec).await
        }
        async fn start(&self, id: &str) -> Result<(), RuntimeError> {
            self.inner.start(id).await?;
            self.cancel.cancel();
            Ok(())
        }
        async fn follow_logs(&self, id: &str, sink: LogSink) -> Result<(), RuntimeError> {
            self.inner.follow_logs(id, sink).await
        }
        async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
            self.inner.wait(id).await
        }
        async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
            self.inner.stop(id).await
        }
        async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
            self.inner.remove(id).await
        }
        async fn build_image(&self, build: &crate::runtime::ImageBuild) -> Result<(), RuntimeError> {
            self.inner.build_image(build).await
        }
        async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
            self.inner.tag_image(source, target).await
        }
        async fn list_images(&self) -> Result<Vec<crate::runtime::ImageSummary>, RuntimeError> {
            self.inner.list_images().await
        }
        async fn remove_image(&self, image: &str, force: bool) -> Result<(), RuntimeError> {
            self.inner.remove_image(image, force).await
        }
        async fn import_image(&self, archive: &Path) -> Result<Vec<String>, RuntimeError> {
            self.inner.import_image(archive).await
        }
    }

    #[tokio::test]
    async fn cancel_during_a_fast_exit_is_reported_as_cancelled() {
        let cancel = CancellationToken::new();
        let runtime = Arc::new(CancelOnStart {
            inner: ProcessRuntime::new(),
            cancel: cancel.clone(),
        });
        let executor = JobExecutor::new(runtime.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        let spec = shell_spec("true", None);
        let outcome = executor.execute(&spec, tx, cancel).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert!(runtime.inner.calls().contains(&"stop geoengine-test".to_string()));
    }

    #[tokio::test]
    async fn cancel_before_start_never_starts_the_container() {
        let runtime = Arc::new(ProcessRuntime::new());
        let executor = JobExecutor::new(runtime.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = executor
            .execute(&shell_spec("echo hi", None), tx, cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("start ")));
    }

    #[tokio::test]
    async fn dropped_sink_does_not_block_the_container() {
        let executor = JobExecutor::new(Arc::new(ProcessRuntime::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let outcome = executor
            .execute(
                &shell_spec("i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done", None),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_matches!(outcome, ExecutionOutcome::Finished(JobResult { exit_code: 0, .. }));
    }
}
