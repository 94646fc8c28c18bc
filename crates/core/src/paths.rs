//! Well-known locations under the GeoEngine home directory.

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Environment variable overriding the home directory (`~/.geoengine`).
pub const HOME_ENV: &str = "GEOENGINE_HOME";

/// File name of a worker manifest inside its directory.
pub const MANIFEST_FILE: &str = "geoengine.yaml";

const HOME_DIR_NAME: &str = ".geoengine";
const SETTINGS_FILE: &str = "settings.yaml";
const STATE_DIR: &str = "state";

/// Resolve the GeoEngine home directory.
///
/// `GEOENGINE_HOME` wins when set and non-empty; otherwise `~/.geoengine`.
pub fn geoengine_home() -> Result<PathBuf, StoreError> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    home::home_dir()
        .map(|home| home.join(HOME_DIR_NAME))
        .ok_or(StoreError::NoHome)
}

/// `<home>/settings.yaml`
pub fn settings_file(home: &Path) -> PathBuf {
    home.join(SETTINGS_FILE)
}

/// `<home>/state`, where build records live.
pub fn state_dir(home: &Path) -> PathBuf {
    home.join(STATE_DIR)
}

/// Resolve a manifest mount `host_path` against the worker directory.
///
/// Only explicitly relative paths (`./`, `../`) are joined; anything else,
/// including bare names that Docker treats as named volumes, is returned
/// unchanged.
pub fn resolve_host_path(worker_dir: &Path, host_path: &str) -> PathBuf {
    if let Some(rest) = host_path.strip_prefix("./") {
        worker_dir.join(rest)
    } else if host_path.starts_with("../") || host_path == "." {
        worker_dir.join(host_path)
    } else {
        PathBuf::from(host_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_slash_joins_worker_dir() {
        let resolved = resolve_host_path(Path::new("/work/ndvi"), "./data");
        assert_eq!(resolved, PathBuf::from("/work/ndvi/data"));
    }

    #[test]
    fn absolute_path_passes_through() {
        let resolved = resolve_host_path(Path::new("/work/ndvi"), "/srv/rasters");
        assert_eq!(resolved, PathBuf::from("/srv/rasters"));
    }

    #[test]
    fn named_volume_passes_through() {
        let resolved = resolve_host_path(Path::new("/work/ndvi"), "cache");
        assert_eq!(resolved, PathBuf::from("cache"));
    }

    #[test]
    fn home_layout() {
        let home = Path::new("/tmp/ge");
        assert_eq!(settings_file(home), PathBuf::from("/tmp/ge/settings.yaml"));
        assert_eq!(state_dir(home), PathBuf::from("/tmp/ge/state"));
    }
}
