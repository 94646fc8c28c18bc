//! Per-worker record of the last successful image build.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::paths;
use crate::store::{self, FileLock};
use crate::types::Timestamp;

/// Digests of the individual files that feed the build hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedHashes {
    pub manifest: String,
    pub dockerfile: String,
    pub script: String,
}

/// What was last built for a worker, stored at `state/<worker>.yaml`.
///
/// Production fields (`version`, `content_hash`, `image_tag`) are only
/// written by production builds; dev builds touch the `dev_*` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub worker_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<TrackedHashes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_image_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<Timestamp>,
}

impl BuildRecord {
    pub fn empty(worker_name: &str) -> Self {
        Self {
            worker_name: worker_name.to_string(),
            version: None,
            content_hash: None,
            image_tag: None,
            components: None,
            dev_content_hash: None,
            dev_image_tag: None,
            built_at: None,
        }
    }

    /// A production build has been recorded.
    pub fn has_production_build(&self) -> bool {
        self.content_hash.is_some()
    }
}

/// Directory of build records, one YAML file per worker.
#[derive(Debug, Clone)]
pub struct BuildRecordStore {
    dir: PathBuf,
}

impl BuildRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn at_home(home: &Path) -> Self {
        Self::new(paths::state_dir(home))
    }

    pub fn record_path(&self, worker: &str) -> PathBuf {
        self.dir.join(format!("{worker}.yaml"))
    }

    pub fn load(&self, worker: &str) -> Result<Option<BuildRecord>, StoreError> {
        store::read_yaml(&self.record_path(worker))
    }

    pub fn save(&self, record: &BuildRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.worker_name);
        let _lock = FileLock::exclusive(&path)?;
        store::write_yaml_atomic(&path, record)
    }

    pub fn delete(&self, worker: &str) -> Result<bool, StoreError> {
        store::remove(&self.record_path(worker))
    }

    /// Move a record to a new worker name. No-op when there is none.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.load(from)? else {
            return Ok(());
        };
        record.worker_name = to.to_string();
        self.save(&record)?;
        self.delete(from)?;
        Ok(())
    }
}
