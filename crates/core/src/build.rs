//! Build decision engine.
//!
//! Decides whether a worker image must be rebuilt by comparing a content
//! hash of the build inputs with the last [`BuildRecord`], and enforces
//! that changed content ships under a strictly greater version.
//!
//! | Situation                                   | Outcome                       |
//! |---------------------------------------------|-------------------------------|
//! | forced                                      | rebuild                       |
//! | no previous production build                | rebuild (version must be valid) |
//! | hash and version unchanged                  | no change                     |
//! | hash unchanged, version changed             | skip, record new version      |
//! | hash changed, version greater               | rebuild                       |
//! | hash changed, version not greater           | `VersionNotBumped`            |
//!
//! Dev builds ignore versions and compare against the last dev hash.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;

use crate::build_record::{BuildRecord, BuildRecordStore, TrackedHashes};
use crate::error::{BuildError, CoreError, VersionError};
use crate::hashing::{combine, sha256_file, sha256_hex};
use crate::manifest::WorkerManifest;
use crate::runtime::{ContainerRuntime, ImageBuild};
use crate::version::WorkerVersion;

/// Repository prefix of production worker images.
pub const LOCAL_REGISTRY: &str = "geoengine-local";
/// Repository prefix of dev worker images.
pub const LOCAL_DEV_REGISTRY: &str = "geoengine-local-dev";

/// Why a rebuild was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    FirstBuild,
    VersionBumped,
    ContentChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDecision {
    Rebuild(RebuildReason),
    NoChange,
    /// Content is unchanged but the version moved; only the record advances.
    SkipWithNotice {
        previous: Option<String>,
        current: String,
    },
}

/// Inputs to [`decide`].
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub hash: &'a str,
    pub version: Option<&'a str>,
    pub force: bool,
    pub dev: bool,
}

impl TrackedHashes {
    /// Hash of all build inputs, H_now.
    pub fn combined(&self) -> String {
        combine(&[&self.manifest, &self.dockerfile, &self.script])
    }
}

/// Hash the manifest's build-relevant fields, the Dockerfile and the script.
///
/// A missing script hashes as empty so interpreter-only workers still build.
pub fn tracked_hashes(manifest: &WorkerManifest, worker_dir: &Path) -> Result<TrackedHashes, BuildError> {
    let dockerfile_path = manifest.dockerfile_path(worker_dir);
    if !dockerfile_path.is_file() {
        return Err(BuildError::DockerfileNotFound {
            path: dockerfile_path,
        });
    }
    let dockerfile = sha256_file(&dockerfile_path).map_err(|source| BuildError::TrackedFile {
        path: dockerfile_path.clone(),
        source,
    })?;

    let script_path = manifest.script_path(worker_dir);
    let script = if script_path.is_file() {
        sha256_file(&script_path).map_err(|source| BuildError::TrackedFile {
            path: script_path.clone(),
            source,
        })?
    } else {
        sha256_hex(b"")
    };

    let manifest_json = manifest.build_relevant_json().to_string();
    Ok(TrackedHashes {
        manifest: sha256_hex(manifest_json.as_bytes()),
        dockerfile,
        script,
    })
}

/// `geoengine-local/<name>:<version>` or `geoengine-local-dev/<name>:latest`.
pub fn image_tag(name: &str, version: Option<&str>, dev: bool) -> String {
    if dev {
        format!("{LOCAL_DEV_REGISTRY}/{name}:latest")
    } else {
        format!("{LOCAL_REGISTRY}/{name}:{}", version.unwrap_or("latest"))
    }
}

fn required_version<'a>(version: Option<&'a str>) -> Result<&'a str, VersionError> {
    version.filter(|v| !v.trim().is_empty()).ok_or(VersionError::Missing)
}

/// Apply the decision table to the current inputs and the last record.
pub fn decide(request: &BuildRequest<'_>, record: Option<&BuildRecord>) -> Result<BuildDecision, CoreError> {
    if request.force {
        return Ok(BuildDecision::Rebuild(RebuildReason::Forced));
    }

    if request.dev {
        let baseline = record.and_then(|r| r.dev_content_hash.as_deref().or(r.content_hash.as_deref()));
        return Ok(match baseline {
            Some(hash) if hash == request.hash => BuildDecision::NoChange,
            Some(_) => BuildDecision::Rebuild(RebuildReason::ContentChanged),
            None => BuildDecision::Rebuild(RebuildReason::FirstBuild),
        });
    }

    let Some(previous) = record.filter(|r| r.has_production_build()) else {
        WorkerVersion::parse(required_version(request.version)?)?;
        return Ok(BuildDecision::Rebuild(RebuildReason::FirstBuild));
    };

    if previous.content_hash.as_deref() == Some(request.hash) {
        if request.version == previous.version.as_deref() {
            return Ok(BuildDecision::NoChange);
        }
        let current = required_version(request.version)?;
        WorkerVersion::parse(current)?;
        return Ok(BuildDecision::SkipWithNotice {
            previous: previous.version.clone(),
            current: current.to_string(),
        });
    }

    let raw = required_version(request.version)?;
    let current = WorkerVersion::parse(raw)?;
    match previous.version.as_deref().and_then(|v| WorkerVersion::parse(v).ok()) {
        Some(last) if current <= last => Err(BuildError::VersionNotBumped {
            current: raw.to_string(),
            previous: last.to_string(),
        }
        .into()),
        _ => Ok(BuildDecision::Rebuild(RebuildReason::VersionBumped)),
    }
}

/// Record to persist after `decision` has been carried out, if any.
pub fn updated_record(
    worker: &str,
    decision: &BuildDecision,
    request: &BuildRequest<'_>,
    hashes: &TrackedHashes,
    previous: Option<BuildRecord>,
) -> Option<BuildRecord> {
    let mut record = previous.unwrap_or_else(|| BuildRecord::empty(worker));
    record.worker_name = worker.to_string();
    match decision {
        BuildDecision::NoChange => return None,
        BuildDecision::SkipWithNotice { current, .. } => {
            record.version = Some(current.clone());
            record.image_tag = Some(image_tag(worker, Some(current), false));
        }
        BuildDecision::Rebuild(_) if request.dev => {
            record.dev_content_hash = Some(request.hash.to_string());
            record.dev_image_tag = Some(image_tag(worker, None, true));
        }
        BuildDecision::Rebuild(_) => {
            record.version = request.version.map(str::to_string);
            record.content_hash = Some(request.hash.to_string());
            record.image_tag = Some(image_tag(worker, request.version, false));
            record.components = Some(hashes.clone());
        }
    }
    record.built_at = Some(Utc::now());
    Some(record)
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Options for [`build_worker`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild without cache regardless of the decision table.
    pub no_cache: bool,
    pub dev: bool,
    /// Overrides merged over `build.args`.
    pub build_args: BTreeMap<String, String>,
}

/// Split `NAME=VALUE` build arguments. The value may be empty or contain `=`.
pub fn parse_build_args(raw: &[String]) -> Result<BTreeMap<String, String>, BuildError> {
    raw.iter()
        .map(|item| match item.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(BuildError::MalformedBuildArg(item.clone())),
        })
        .collect()
}

/// What [`build_worker`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub worker: String,
    pub decision: BuildDecision,
    pub image_tag: String,
    pub built: bool,
}

/// Decide and, if needed, build a worker image, then persist the record.
///
/// The record is only written after the image build succeeds. A
/// version-only bump re-tags the existing image under the new version.
pub async fn build_worker(
    runtime: &dyn ContainerRuntime,
    records: &BuildRecordStore,
    worker_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildReport, CoreError> {
    let manifest = WorkerManifest::load_from_dir(worker_dir)?;
    let hashes = tracked_hashes(&manifest, worker_dir)?;
    let hash = hashes.combined();
    let previous = records.load(&manifest.name)?;

    let request = BuildRequest {
        hash: &hash,
        version: manifest.version.as_deref(),
        force: options.no_cache,
        dev: options.dev,
    };
    let decision = decide(&request, previous.as_ref())?;
    let tag = image_tag(&manifest.name, manifest.version.as_deref(), options.dev);
    tracing::debug!(worker = %manifest.name, ?decision, "Build decision");

    let built = matches!(decision, BuildDecision::Rebuild(_));
    if built {
        let mut args = manifest.build.args.clone();
        args.extend(options.build_args.clone());
        runtime
            .build_image(&ImageBuild {
                tag: tag.clone(),
                dockerfile: manifest.dockerfile_path(worker_dir),
                context: manifest.context_path(worker_dir),
                args,
                no_cache: options.no_cache,
            })
            .await?;
    } else if let BuildDecision::SkipWithNotice { .. } = &decision {
        if let Some(existing) = previous.as_ref().and_then(|r| r.image_tag.as_deref()) {
            runtime.tag_image(existing, &tag).await?;
        }
    }

    if let Some(record) = updated_record(&manifest.name, &decision, &request, &hashes, previous) {
        records.save(&record)?;
    }

    Ok(BuildReport {
        worker: manifest.name,
        decision,
        image_tag: tag,
        built,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
