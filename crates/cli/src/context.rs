//! Handles shared by every command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use geoengine_core::build_record::BuildRecordStore;
use geoengine_core::manifest::WorkerManifest;
use geoengine_core::paths::{self, MANIFEST_FILE};
use geoengine_core::runtime::{ContainerRuntime, DockerRuntime};
use geoengine_core::settings::SettingsStore;

pub struct CliContext {
    pub settings: SettingsStore,
    pub records: BuildRecordStore,
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Directory the command was invoked from.
    pub cwd: PathBuf,
}

impl CliContext {
    /// Default home, the local Docker daemon and the process working directory.
    pub fn from_env() -> anyhow::Result<Self> {
        let home = paths::geoengine_home()?;
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
        Ok(Self::at_home(&home, cwd, Arc::new(runtime)))
    }

    pub fn at_home(home: &Path, cwd: PathBuf, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            settings: SettingsStore::at_home(home),
            records: BuildRecordStore::at_home(home),
            runtime,
            cwd,
        }
    }

    /// Directory of the worker named by `target`.
    ///
    /// A registered name wins; otherwise `target` is a directory (relative
    /// to the working directory) holding a manifest. Without a target the
    /// working directory itself must be a worker.
    pub fn worker_dir(&self, target: Option<&str>) -> anyhow::Result<PathBuf> {
        match target {
            Some(name) => Ok(self.settings.load()?.worker_path(name, &self.cwd)?),
            None => {
                if !self.cwd.join(MANIFEST_FILE).is_file() {
                    bail!(
                        "No {MANIFEST_FILE} found in {}. Specify a worker or run from a worker directory.",
                        self.cwd.display()
                    );
                }
                Ok(self.cwd.clone())
            }
        }
    }

    /// Resolve and load a worker's manifest.
    pub fn load_worker(&self, target: Option<&str>) -> anyhow::Result<(PathBuf, WorkerManifest)> {
        let dir = self.worker_dir(target)?;
        let manifest = WorkerManifest::load_from_dir(&dir)?;
        Ok((dir, manifest))
    }
}
