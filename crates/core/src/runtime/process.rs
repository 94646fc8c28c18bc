//! Host-process stand-in for Docker.
//!
//! Runs the container argv directly on the host, ignoring the image, and
//! records every lifecycle call so tests can assert on them. The job's
//! output directory is exposed through [`OUTPUT_DIR_ENV`] as the host path
//! that would have been mounted at `/output`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use super::{ContainerRuntime, ContainerSpec, ImageBuild, ImageSummary, LineForwarder};
use crate::error::RuntimeError;
use crate::executor::{LogSink, LogStream};
use crate::mapping::OUTPUT_DIR_ENV;

/// Exit code reported for a process killed by `stop`.
pub const STOPPED_EXIT_CODE: i64 = 137;

#[derive(Default)]
struct Container {
    spec: Option<ContainerSpec>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stop: CancellationToken,
}

#[derive(Default)]
pub struct ProcessRuntime {
    /// Images reported as absent by `image_exists`.
    pub missing_images: Vec<String>,
    /// Make every `build_image` fail.
    pub fail_builds: bool,
    /// Lifecycle calls in order: `create <name>`, `start <name>`, `stop <name>`,
    /// `rm <name>`, `tag <source> <target>`.
    pub calls: Mutex<Vec<String>>,
    pub builds: Mutex<Vec<ImageBuild>>,
    /// Local image store: reference to summary.
    pub images: Mutex<BTreeMap<String, ImageSummary>>,
    containers: Mutex<HashMap<String, Container>>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_image(mut self, image: impl Into<String>) -> Self {
        self.missing_images.push(image.into());
        self
    }

    pub fn failing_builds(mut self) -> Self {
        self.fail_builds = true;
        self
    }

    /// Add an image to the local store.
    pub fn with_image(self, reference: &str) -> Self {
        self.insert_image(reference);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn built_tags(&self) -> Vec<String> {
        lock(&self.builds).iter().map(|b| b.tag.clone()).collect()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn insert_image(&self, reference: &str) {
        let mut images = lock(&self.images);
        let id = format!("sha256:{:0>12}", images.len() + 1);
        images.insert(
            reference.to_string(),
            ImageSummary {
                id,
                tags: vec![reference.to_string()],
                size: 1024,
                created: 0,
            },
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn forward<R: AsyncRead + Unpin>(reader: Option<R>, mut fwd: LineForwarder) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => fwd.push(&buf[..n]),
        }
    }
    fwd.finish();
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(!self.missing_images.iter().any(|m| m == image))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(format!("create {}", spec.name));
        let container = Container {
            spec: Some(spec.clone()),
            ..Default::default()
        };
        lock(&self.containers).insert(spec.name.clone(), container);
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start {id}"));
        let mut containers = lock(&self.containers);
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::StartFailed(format!("no such container {id}")))?;
        let spec = container
            .spec
            .as_ref()
            .ok_or_else(|| RuntimeError::StartFailed(format!("{id} has no spec")))?;
        let (program, args) = spec
            .args
            .split_first()
            .ok_or_else(|| RuntimeError::StartFailed("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.output_dir {
            cmd.env(OUTPUT_DIR_ENV, dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::StartFailed(format!("{program}: {e}")))?;
        container.stdout = child.stdout.take();
        container.stderr = child.stderr.take();
        container.child = Some(child);
        Ok(())
    }

    async fn follow_logs(&self, id: &str, sink: LogSink) -> Result<(), RuntimeError> {
        let (stdout, stderr) = match lock(&self.containers).get_mut(id) {
            Some(c) => (c.stdout.take(), c.stderr.take()),
            None => (None, None),
        };
        tokio::join!(
            forward(stdout, LineForwarder::new(LogStream::Stdout, sink.clone())),
            forward(stderr, LineForwarder::new(LogStream::Stderr, sink)),
        );
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let (child, stop) = match lock(&self.containers).get_mut(id) {
            Some(c) => (c.child.take(), c.stop.clone()),
            None => return Err(RuntimeError::StartFailed(format!("no such container {id}"))),
        };
        let Some(mut child) = child else {
            return Err(RuntimeError::StartFailed(format!("{id} was not started")));
        };
        tokio::select! {
            status = child.wait() => Ok(status?.code().map_or(-1, i64::from)),
            () = stop.cancelled() => {
                let _ = child.kill().await;
                Ok(STOPPED_EXIT_CODE)
            }
        }
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("stop {id}"));
        if let Some(container) = lock(&self.containers).get(id) {
            container.stop.cancel();
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("rm {id}"));
        if let Some(container) = lock(&self.containers).remove(id) {
            container.stop.cancel();
        }
        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild) -> Result<(), RuntimeError> {
        if self.fail_builds {
            return Err(RuntimeError::BuildFailed("boom".into()));
        }
        lock(&self.builds).push(build.clone());
        self.insert_image(&build.tag);
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.record(format!("tag {source} {target}"));
        self.insert_image(target);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError> {
        Ok(lock(&self.images).values().cloned().collect())
    }

    async fn remove_image(&self, image: &str, _force: bool) -> Result<(), RuntimeError> {
        match lock(&self.images).remove(image) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::ImageNotFound(image.to_string())),
        }
    }

    /// Each non-empty line of the archive is treated as one image reference.
    async fn import_image(&self, archive: &Path) -> Result<Vec<String>, RuntimeError> {
        let contents = tokio::fs::read_to_string(archive).await?;
        let loaded: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if loaded.is_empty() {
            return Err(RuntimeError::ImportFailed(format!(
                "{} did not contain an image",
                archive.display()
            )));
        }
        for reference in &loaded {
            self.insert_image(reference);
        }
        Ok(loaded)
    }
}
