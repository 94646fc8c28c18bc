//! Global settings: the worker registry and service defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, StoreError};
use crate::paths::{self, MANIFEST_FILE};
use crate::store::{self, FileLock};

/// Default port for the legacy job service.
pub const DEFAULT_SERVICE_PORT: u16 = 9876;

/// Default number of jobs allowed to run concurrently.
pub const DEFAULT_MAX_WORKERS: usize = 4;

fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// Contents of `settings.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Registered workers: name to absolute worker directory.
    #[serde(default, alias = "projects")]
    pub workers: BTreeMap<String, PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_region: Option<String>,

    #[serde(default = "default_service_port")]
    pub service_port: u16,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: BTreeMap::new(),
            gcp_project: None,
            gcp_region: None,
            service_port: DEFAULT_SERVICE_PORT,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl Settings {
    /// Register (or re-point) a worker. Returns the previous path, if any.
    pub fn register_worker(&mut self, name: &str, dir: PathBuf) -> Option<PathBuf> {
        self.workers.insert(name.to_string(), dir)
    }

    pub fn unregister_worker(&mut self, name: &str) -> Result<PathBuf, CoreError> {
        self.workers.remove(name).ok_or_else(|| CoreError::NotFound {
            entity: "Worker",
            id: name.to_string(),
        })
    }

    /// Directory of a registered worker.
    pub fn registered_worker_path(&self, name: &str) -> Result<PathBuf, CoreError> {
        self.workers.get(name).cloned().ok_or_else(|| CoreError::NotFound {
            entity: "Worker",
            id: name.to_string(),
        })
    }

    /// Resolve a worker by registered name, falling back to a directory
    /// holding a manifest. Relative directories are taken from `base`.
    pub fn worker_path(&self, name_or_path: &str, base: &Path) -> Result<PathBuf, CoreError> {
        if let Some(dir) = self.workers.get(name_or_path) {
            return Ok(dir.clone());
        }
        let candidate = base.join(name_or_path);
        if candidate.join(MANIFEST_FILE).is_file() {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
        Err(CoreError::NotFound {
            entity: "Worker",
            id: name_or_path.to_string(),
        })
    }

    /// Name under which `dir` is registered, if any.
    pub fn find_worker_by_path(&self, dir: &Path) -> Option<&str> {
        self.workers
            .iter()
            .find(|(_, path)| path.as_path() == dir)
            .map(|(name, _)| name.as_str())
    }

    pub fn list_workers(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.workers.iter().map(|(n, p)| (n.as_str(), p.as_path()))
    }
}

/// Handle to a `settings.yaml` file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at a GeoEngine home directory.
    pub fn at_home(home: &Path) -> Self {
        Self::new(paths::settings_file(home))
    }

    /// Store at the default home (`GEOENGINE_HOME` or `~/.geoengine`).
    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::at_home(&paths::geoengine_home()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings; defaults when the file does not exist yet.
    pub fn load(&self) -> Result<Settings, StoreError> {
        Ok(store::read_yaml(&self.path)?.unwrap_or_default())
    }

    /// Read-modify-write under an exclusive lock.
    ///
    /// Nothing is written when `mutate` fails.
    pub fn update<T>(
        &self,
        mutate: impl FnOnce(&mut Settings) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut settings: Settings = store::read_yaml_unlocked(&self.path)?.unwrap_or_default();
        let out = mutate(&mut settings)?;
        store::write_yaml_atomic(&self.path, &settings)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_file_yields_defaults() {
        let home = tempfile::tempdir().unwrap();
        let settings = SettingsStore::at_home(home.path()).load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.service_port, 9876);
    }

    #[test]
    fn legacy_projects_key_is_accepted() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("settings.yaml"),
            "projects:\n  ndvi: /work/ndvi\nservice_port: 8000\n",
        )
        .unwrap();
        let settings = SettingsStore::at_home(home.path()).load().unwrap();
        assert_eq!(settings.workers.get("ndvi"), Some(&PathBuf::from("/work/ndvi")));
        assert_eq!(settings.service_port, 8000);
        assert_eq!(settings.max_workers, DEFAULT_MAX_WORKERS);
    }

    #[test]
    fn update_persists_mutations() {
        let home = tempfile::tempdir().unwrap();
        let store = SettingsStore::at_home(home.path());
        store
            .update(|s| {
                s.register_worker("ndvi", PathBuf::from("/work/ndvi"));
                Ok(())
            })
            .unwrap();

        let settings = store.load().unwrap();
        assert_eq!(settings.find_worker_by_path(Path::new("/work/ndvi")), Some("ndvi"));
        assert_eq!(settings.list_workers().count(), 1);
    }

    #[test]
    fn failed_update_writes_nothing() {
        let home = tempfile::tempdir().unwrap();
        let store = SettingsStore::at_home(home.path());
        let result = store.update(|s| s.unregister_worker("ghost").map(|_| ()));
        assert_matches!(result, Err(CoreError::NotFound { .. }));
        assert!(!store.path().exists());
    }

    #[test]
    fn worker_path_prefers_registration_then_directory() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("ndvi");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "name: ndvi\n").unwrap();

        let mut settings = Settings::default();
        assert_eq!(
            settings.worker_path("ndvi", base.path()).unwrap(),
            dir.canonicalize().unwrap()
        );
        settings.register_worker("ndvi", PathBuf::from("/registered/ndvi"));
        assert_eq!(
            settings.worker_path("ndvi", base.path()).unwrap(),
            PathBuf::from("/registered/ndvi")
        );
        assert_matches!(
            settings.worker_path("missing", base.path()),
            Err(CoreError::NotFound { entity: "Worker", .. })
        );
    }
}
