//! Lock-protected YAML persistence for settings and build records.
//!
//! Writers take an exclusive advisory lock on a sibling `<file>.lock`,
//! write a temp file in the same directory and rename it over the target,
//! so readers never observe a half-written record.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

const READ_ATTEMPTS: u32 = 5;
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

/// RAII guard over an advisory lock on `<target>.lock`.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until an exclusive lock on `target` is held.
    pub fn exclusive(target: &Path) -> Result<Self, StoreError> {
        let (file, path) = open_lock_file(target)?;
        file.lock_exclusive()
            .map_err(|source| StoreError::Lock { path: path.clone(), source })?;
        Ok(Self { file, path })
    }

    /// Block until a shared lock on `target` is held.
    pub fn shared(target: &Path) -> Result<Self, StoreError> {
        let (file, path) = open_lock_file(target)?;
        file.lock_shared()
            .map_err(|source| StoreError::Lock { path: path.clone(), source })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release file lock");
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

fn open_lock_file(target: &Path) -> Result<(File, PathBuf), StoreError> {
    let path = lock_path(target);
    ensure_parent(&path)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| StoreError::Io { path: path.clone(), source })?;
    Ok((file, path))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Read a YAML record under a shared lock. `Ok(None)` if it does not exist.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let _lock = FileLock::shared(path)?;
    read_yaml_unlocked(path)
}

/// Read a YAML record, assuming the caller already holds the lock.
///
/// A record that fails to parse is re-read a few times before it is
/// reported as corrupt.
pub fn read_yaml_unlocked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let mut last_error = String::new();
    for attempt in 1..=READ_ATTEMPTS {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        match serde_yaml::from_str(&content) {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "Record unreadable, retrying");
                last_error = e.to_string();
            }
        }
        if attempt < READ_ATTEMPTS {
            std::thread::sleep(READ_RETRY_DELAY);
        }
    }
    Err(StoreError::Corrupt {
        path: path.to_path_buf(),
        message: last_error,
    })
}

/// Atomically replace `path` with the YAML form of `value`.
///
/// The caller must hold an exclusive [`FileLock`] on `path`.
pub fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_yaml::to_string(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
    ensure_parent(path)?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, content).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Remove a record under an exclusive lock. Missing files are not an error.
pub fn remove(path: &Path) -> Result<bool, StoreError> {
    let _lock = FileLock::exclusive(path)?;
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
