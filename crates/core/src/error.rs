//! Error taxonomy shared by every GeoEngine component.
//!
//! Each stage of the engine has its own error enum so callers can tell a
//! malformed manifest apart from a rejected build or a container that
//! never started. [`CoreError`] is the umbrella used at crate boundaries.

use std::path::PathBuf;

/// The worker manifest is unreadable, malformed or incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Missing required field `{field}`")]
    Missing { field: String },

    #[error("Invalid `{field}`: {message}")]
    InvalidType { field: String, message: String },

    #[error("Invalid value `{value}` for `{field}` (allowed: {})", allowed.join(", "))]
    InvalidEnum {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Duplicate input name `{0}`")]
    Duplicate(String),
}

/// A version string is absent or not `MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("No version specified. Add `version: MAJOR.MINOR.PATCH` to geoengine.yaml before building")]
    Missing,

    #[error("Invalid version '{0}'. Versions must follow MAJOR.MINOR.PATCH")]
    Invalid(String),
}

/// The build was refused before any image was produced.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(
        "Build-related files have changed, but the version ('{current}') is not greater than \
         the last built version ('{previous}'). Bump the version in geoengine.yaml before rebuilding"
    )]
    VersionNotBumped { current: String, previous: String },

    #[error("No Dockerfile found at {}", path.display())]
    DockerfileNotFound { path: PathBuf },

    #[error("Failed to read tracked file {}: {source}", path.display())]
    TrackedFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid build argument '{0}'. Expected NAME=VALUE")]
    MalformedBuildArg(String),
}

/// Job inputs could not be mapped onto the worker's declared inputs.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Unknown input `{0}`")]
    UnknownInput(String),

    #[error("Missing required input `{0}`")]
    MissingRequired(String),

    #[error("Invalid choice `{value}` for input `{input}` (allowed: {})", allowed.join(", "))]
    InvalidChoice {
        input: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Invalid input format '{0}'. Expected KEY=VALUE")]
    Malformed(String),

    #[error("Failed to resolve path for input `{input}`: {source}")]
    Path {
        input: String,
        source: std::io::Error,
    },
}

/// The container runtime could not start, stop or build something.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Image '{0}' not found. Run `geoengine build` first")]
    ImageNotFound(String),

    #[error("Invalid mount {}: {reason}", host_path.display())]
    InvalidMount { host_path: PathBuf, reason: String },

    #[error("Container failed to start: {0}")]
    StartFailed(String),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Image import failed: {0}")]
    ImportFailed(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings or build-record persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not determine the home directory; set GEOENGINE_HOME")]
    NoHome,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt record {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("Failed to serialize record: {0}")]
    Serialize(String),
}

/// Umbrella error returned across crate boundaries.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Convenience alias for results carrying a [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_enum_lists_allowed_values() {
        let err = ConfigError::InvalidEnum {
            field: "command.inputs.format.default".into(),
            value: "bmp".into(),
            allowed: vec!["png".into(), "tiff".into()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid value `bmp` for `command.inputs.format.default` (allowed: png, tiff)"
        );
    }

    #[test]
    fn version_not_bumped_is_actionable() {
        let err = BuildError::VersionNotBumped {
            current: "1.0.0".into(),
            previous: "1.0.0".into(),
        };
        assert!(err.to_string().contains("Bump the version"));
    }

    #[test]
    fn core_error_is_transparent_over_stage_errors() {
        let err: CoreError = MappingError::UnknownInput("dem".into()).into();
        assert_eq!(err.to_string(), "Unknown input `dem`");
    }
}
