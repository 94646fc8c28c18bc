//! Strict `MAJOR.MINOR.PATCH` worker versions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::VersionError;

fn version_regex() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version regex must compile"))
}

/// A validated worker version.
///
/// Pre-release and build metadata suffixes are rejected; ordering compares
/// major, then minor, then patch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerVersion(semver::Version);

impl WorkerVersion {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let trimmed = raw.trim();
        if !version_regex().is_match(trimmed) {
            return Err(VersionError::Invalid(raw.to_string()));
        }
        semver::Version::parse(trimmed)
            .map(Self)
            .map_err(|_| VersionError::Invalid(raw.to_string()))
    }
}

impl fmt::Display for WorkerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validate a version string without keeping the parsed value.
pub fn validate(raw: &str) -> Result<(), VersionError> {
    WorkerVersion::parse(raw).map(|_| ())
}

/// Compare two version strings, failing if either is malformed.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(WorkerVersion::parse(a)?.cmp(&WorkerVersion::parse(b)?))
}
