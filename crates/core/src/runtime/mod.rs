//! Container runtime abstraction.
//!
//! [`ContainerRuntime`] is the seam between the engine and the daemon that
//! actually runs containers. [`DockerRuntime`] talks to the Docker Engine
//! API through `bollard`; the test suites substitute a runtime that runs
//! the container argv as a host process.
//!
//! A container goes through `create`, `start`, `wait` and `remove` as
//! separate calls so the executor always knows the container id before the
//! workload begins and can clean it up on every path.

mod docker;
#[cfg(any(test, feature = "test-support"))]
mod process;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RuntimeError;
use crate::executor::{LogLine, LogSink, LogStream};
use crate::mapping::{Mount, ResolvedInvocation};

pub use docker::DockerRuntime;
#[cfg(any(test, feature = "test-support"))]
pub use process::ProcessRuntime;

/// A container to launch for one job.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique container name, used to stop and remove it later.
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    /// Host directory scanned for output files after the run.
    pub output_dir: Option<PathBuf>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, invocation: ResolvedInvocation) -> Self {
        Self {
            name: format!("geoengine-{}", uuid::Uuid::new_v4().simple()),
            image: image.into(),
            args: invocation.args,
            mounts: invocation.mounts,
            env: invocation.env,
            output_dir: invocation.output_dir,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Parameters of an image build.
#[derive(Debug, Clone)]
pub struct ImageBuild {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub args: BTreeMap<String, String>,
    pub no_cache: bool,
}

/// A locally stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
    /// Size in bytes.
    pub size: i64,
    /// Creation time, seconds since the Unix epoch.
    pub created: i64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Create (but do not start) a container for `spec` and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Forward the container's output to `sink` line by line until the
    /// container's streams close.
    async fn follow_logs(&self, id: &str, sink: LogSink) -> Result<(), RuntimeError>;

    /// Block until the container exits and return its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Ask a running container to stop.
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a container. Removing one that no longer exists is not an error.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// Build and tag an image.
    async fn build_image(&self, build: &ImageBuild) -> Result<(), RuntimeError>;

    /// Add `target` as another tag of the existing image `source`.
    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError>;

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), RuntimeError>;

    /// Load an image archive (as written by `docker save`) and return the
    /// references it contained.
    async fn import_image(&self, archive: &Path) -> Result<Vec<String>, RuntimeError>;
}

/// Splits a byte stream into lines and sends each one to a [`LogSink`].
///
/// Chunks may end mid-line; the remainder is held until the next chunk or
/// [`LineForwarder::finish`]. Once the sink is gone further output is
/// dropped so the producer can keep draining.
pub struct LineForwarder {
    stream: LogStream,
    sink: LogSink,
    partial: Vec<u8>,
    open: bool,
}

impl LineForwarder {
    pub fn new(stream: LogStream, sink: LogSink) -> Self {
        Self {
            stream,
            sink,
            partial: Vec::new(),
            open: true,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.send(&line);
        }
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.send(&line);
        }
    }

    fn send(&mut self, raw: &[u8]) {
        if !self.open {
            return;
        }
        let line = String::from_utf8_lossy(raw)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let stream = self.stream;
        if self.sink.send(LogLine { stream, line }).is_err() {
            tracing::warn!(?stream, "Log consumer went away, discarding further output");
            self.open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(mut rx: mpsc::UnboundedReceiver<LogLine>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.line);
        }
        lines
    }

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut fwd = LineForwarder::new(LogStream::Stdout, tx);
        fwd.push(b"first\r\nsec");
        fwd.push(b"ond\nthi");
        fwd.finish();
        assert_eq!(drain(rx), vec!["first", "second", "thi"]);
    }

    #[test]
    fn closed_sink_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut fwd = LineForwarder::new(LogStream::Stderr, tx);
        fwd.push(b"a\nb\nc\n");
        assert!(!fwd.open);
        fwd.finish();
    }
}
