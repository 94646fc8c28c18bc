//! Worker registry commands: `init`, `apply`, `delete`, `workers`,
//! `describe` and `diff`.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use geoengine_core::build::{image_tag, tracked_hashes};
use geoengine_core::build_record::BuildRecord;
use geoengine_core::error::CoreError;
use geoengine_core::manifest::{CommandSpec, MountSpec, PluginFlags, WorkerManifest};
use geoengine_core::paths::MANIFEST_FILE;
use geoengine_core::version;
use serde::Serialize;

use super::{print_json, short_hash};
use crate::cli::{DescribeArgs, DiffArgs, DiffScope, GisHost, InitArgs, WorkerTarget, WorkersArgs};
use crate::context::CliContext;

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Write a starter manifest into the working directory.
pub fn init_worker(ctx: &CliContext, name: Option<&str>, force: bool) -> anyhow::Result<PathBuf> {
    let path = ctx.cwd.join(MANIFEST_FILE);
    if path.exists() && !force {
        bail!(
            "{MANIFEST_FILE} already exists in {}. Use --force to overwrite it.",
            ctx.cwd.display()
        );
    }
    let name = match name {
        Some(name) => name.to_string(),
        None => ctx
            .cwd
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("my-worker")
            .to_string(),
    };
    std::fs::write(&path, WorkerManifest::template(&name))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(worker = %name, path = %path.display(), "Created manifest");
    Ok(path)
}

pub fn init(ctx: &CliContext, args: &InitArgs) -> anyhow::Result<ExitCode> {
    let path = init_worker(ctx, args.name.as_deref(), args.force)?;
    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {MANIFEST_FILE} to describe your worker");
    println!("  2. Run `geoengine apply` to register it");
    println!("  3. Run `geoengine build` to build its image");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Registered { name: String, dir: PathBuf },
    Unchanged { name: String, dir: PathBuf },
    /// The manifest name changed; registration and build record follow it.
    Renamed { from: String, to: String, dir: PathBuf },
    /// The name was registered to another directory.
    Moved { name: String, from: PathBuf, to: PathBuf },
}

/// Register the worker, following renames and moves.
pub fn apply_worker(ctx: &CliContext, target: Option<&str>) -> anyhow::Result<ApplyOutcome> {
    let (dir, manifest) = ctx.load_worker(target)?;
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    if let Some(raw) = manifest.version.as_deref() {
        if let Err(e) = version::validate(raw) {
            tracing::warn!(worker = %manifest.name, error = %e, "Worker cannot be built until its version is fixed");
        }
    }

    let name = manifest.name.clone();
    let outcome = ctx.settings.update(|settings| {
        if let Some(existing) = settings.find_worker_by_path(&dir).map(str::to_string) {
            if existing == name {
                return Ok(ApplyOutcome::Unchanged { name, dir: dir.clone() });
            }
            if settings.registered_worker_path(&name).is_ok() {
                return Err(CoreError::Conflict(format!(
                    "Cannot rename '{existing}' to '{name}': a worker with that name is already registered"
                )));
            }
            settings.unregister_worker(&existing)?;
            settings.register_worker(&name, dir.clone());
            return Ok(ApplyOutcome::Renamed {
                from: existing,
                to: name,
                dir: dir.clone(),
            });
        }
        Ok(match settings.register_worker(&name, dir.clone()) {
            None => ApplyOutcome::Registered { name, dir: dir.clone() },
            Some(previous) => ApplyOutcome::Moved {
                name,
                from: previous,
                to: dir.clone(),
            },
        })
    })?;

    if let ApplyOutcome::Renamed { from, to, .. } = &outcome {
        ctx.records.rename(from, to)?;
    }
    tracing::debug!(?outcome, "Applied worker");
    Ok(outcome)
}

pub fn apply(ctx: &CliContext, args: &WorkerTarget) -> anyhow::Result<ExitCode> {
    match apply_worker(ctx, args.worker.as_deref())? {
        ApplyOutcome::Registered { name, dir } => {
            println!("Registered worker '{name}' at {}", dir.display());
        }
        ApplyOutcome::Unchanged { name, .. } => {
            println!("Worker '{name}' is already registered");
        }
        ApplyOutcome::Renamed { from, to, .. } => {
            println!("Worker renamed from '{from}' to '{to}'; registration updated");
        }
        ApplyOutcome::Moved { name, from, to } => {
            println!("Worker '{name}' moved: {} -> {}", from.display(), to.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

/// Unregister a worker and drop its build record. Returns its directory.
pub fn delete_worker(ctx: &CliContext, target: Option<&str>) -> anyhow::Result<(String, PathBuf)> {
    let name = match target {
        Some(name) => name.to_string(),
        None => registered_name_for_cwd(ctx)?,
    };
    let dir = ctx.settings.update(|settings| settings.unregister_worker(&name))?;
    ctx.records.delete(&name)?;
    if !dir.join(MANIFEST_FILE).is_file() {
        tracing::warn!(worker = %name, dir = %dir.display(), "Worker directory no longer holds a manifest");
    }
    tracing::info!(worker = %name, "Deleted worker");
    Ok((name, dir))
}

/// Name the working directory is registered under, else its manifest name.
fn registered_name_for_cwd(ctx: &CliContext) -> anyhow::Result<String> {
    let settings = ctx.settings.load()?;
    if let Ok(cwd) = ctx.cwd.canonicalize() {
        if let Some(name) = settings.find_worker_by_path(&cwd) {
            return Ok(name.to_string());
        }
    }
    let (_, manifest) = ctx.load_worker(None)?;
    Ok(manifest.name)
}

pub fn delete(ctx: &CliContext, args: &WorkerTarget) -> anyhow::Result<ExitCode> {
    let (name, _) = delete_worker(ctx, args.worker.as_deref())?;
    println!("Deleted worker '{name}'");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WorkerEntry {
    pub name: String,
    pub path: PathBuf,
    /// The directory still holds a manifest.
    pub found: bool,
    /// The manifest loads and declares a command.
    pub has_tool: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub plugins: PluginFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

pub fn list_workers(ctx: &CliContext, gis: Option<GisHost>) -> anyhow::Result<Vec<WorkerEntry>> {
    let settings = ctx.settings.load()?;
    let mut entries = Vec::new();
    for (name, dir) in settings.list_workers() {
        let manifest = WorkerManifest::load_from_dir(dir).ok();
        let plugins = manifest.as_ref().map(|m| m.plugins).unwrap_or_default();
        let enabled = match gis {
            None => true,
            Some(GisHost::Arcgis) => plugins.arcgis,
            Some(GisHost::Qgis) => plugins.qgis,
        };
        if !enabled {
            continue;
        }
        let image = ctx
            .records
            .load(name)
            .ok()
            .flatten()
            .and_then(|record| record.image_tag);
        entries.push(WorkerEntry {
            name: name.to_string(),
            path: dir.to_path_buf(),
            found: dir.join(MANIFEST_FILE).is_file(),
            has_tool: manifest.is_some(),
            version: manifest.as_ref().and_then(|m| m.version.clone()),
            description: manifest.and_then(|m| m.description),
            plugins,
            image,
        });
    }
    Ok(entries)
}

pub fn list(ctx: &CliContext, args: &WorkersArgs) -> anyhow::Result<ExitCode> {
    let entries = list_workers(ctx, args.gis)?;
    if args.json {
        print_json(&entries)?;
        return Ok(ExitCode::SUCCESS);
    }
    if entries.is_empty() {
        println!("No workers registered");
        println!();
        println!("Register a worker with: geoengine apply");
        return Ok(ExitCode::SUCCESS);
    }

    let name_w = entries.iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);
    println!("{:<name_w$}  {:<8}  {:<5}  PATH", "NAME", "VERSION", "FOUND");
    for entry in &entries {
        println!(
            "{:<name_w$}  {:<8}  {:<5}  {}",
            entry.name,
            entry.version.as_deref().unwrap_or("-"),
            if entry.found { "yes" } else { "no" },
            entry.path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// describe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WorkerDescription {
    pub name: String,
    pub path: PathBuf,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: CommandSpec,
    pub mounts: Vec<MountSpec>,
    pub plugins: PluginFlags,
    /// Tag `run` will use for the production image.
    pub image: String,
    /// Version of the last production image.
    pub version_built: Option<String>,
    pub build_status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build: Option<BuildRecord>,
}

/// How the manifest version relates to the last production build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    NotBuilt,
    UpToDate,
    /// The manifest is ahead of the image; `build` will produce it.
    NeedsBuild,
    /// The manifest version is lower than the built one.
    Behind,
    /// One of the versions is malformed.
    Unknown,
}

fn build_status(current: Option<&str>, built: Option<&str>) -> BuildStatus {
    let (Some(current), Some(built)) = (current, built) else {
        return if built.is_none() {
            BuildStatus::NotBuilt
        } else {
            BuildStatus::Unknown
        };
    };
    match version::compare(current, built) {
        Ok(Ordering::Equal) => BuildStatus::UpToDate,
        Ok(Ordering::Greater) => BuildStatus::NeedsBuild,
        Ok(Ordering::Less) => BuildStatus::Behind,
        Err(_) => BuildStatus::Unknown,
    }
}

pub fn describe_worker(ctx: &CliContext, target: Option<&str>) -> anyhow::Result<WorkerDescription> {
    let (dir, manifest) = ctx.load_worker(target)?;
    let registered = ctx
        .settings
        .load()?
        .registered_worker_path(&manifest.name)
        .is_ok();
    let last_build = ctx.records.load(&manifest.name)?;
    let version_built = last_build
        .as_ref()
        .filter(|r| r.has_production_build())
        .and_then(|r| r.version.clone());
    Ok(WorkerDescription {
        image: image_tag(&manifest.name, manifest.version.as_deref(), false),
        build_status: build_status(manifest.version.as_deref(), version_built.as_deref()),
        version_built,
        name: manifest.name,
        path: dir,
        registered,
        version: manifest.version,
        description: manifest.description,
        command: manifest.command,
        mounts: manifest.mounts,
        plugins: manifest.plugins,
        last_build,
    })
}

pub fn describe(ctx: &CliContext, args: &DescribeArgs) -> anyhow::Result<ExitCode> {
    let desc = describe_worker(ctx, args.target.worker.as_deref())?;
    if args.json {
        print_json(&desc)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("Worker:      {}", desc.name);
    println!("Path:        {}", desc.path.display());
    println!("Registered:  {}", if desc.registered { "yes" } else { "no" });
    println!("Version:     {}", desc.version.as_deref().unwrap_or("-"));
    let status = match desc.build_status {
        BuildStatus::NotBuilt => "not built",
        BuildStatus::UpToDate => "up to date",
        BuildStatus::NeedsBuild => "newer than the built image; run `geoengine build`",
        BuildStatus::Behind => "lower than the built version",
        BuildStatus::Unknown => "cannot be compared",
    };
    println!(
        "Built:       {} ({status})",
        desc.version_built.as_deref().unwrap_or("-")
    );
    if let Some(description) = &desc.description {
        println!("Description: {description}");
    }
    println!("Command:     {} {}", desc.command.program, desc.command.script);
    println!("Image:       {}", desc.image);
    println!(
        "Plugins:     arcgis={} qgis={}",
        desc.plugins.arcgis, desc.plugins.qgis
    );

    if !desc.command.inputs.is_empty() {
        println!();
        println!("Inputs:");
        for input in &desc.command.inputs {
            let mut line = format!("  --{} <{}>", input.flag(), input.input_type.as_str());
            if input.required {
                line.push_str(" (required)");
            }
            if let Some(default) = &input.default {
                line.push_str(&format!(" [default: {default}]"));
            }
            if !input.enum_values.is_empty() {
                line.push_str(&format!(" [choices: {}]", input.enum_values.join(", ")));
            }
            if let Some(text) = &input.description {
                line.push_str(&format!("  {text}"));
            }
            println!("{line}");
        }
    }

    if !desc.mounts.is_empty() {
        println!();
        println!("Mounts:");
        for mount in &desc.mounts {
            let mode = if mount.readonly { "ro" } else { "rw" };
            println!("  {} -> {} ({mode})", mount.host_path, mount.container_path);
        }
    }

    println!();
    match &desc.last_build {
        Some(record) if record.has_production_build() => println!(
            "Last build:  {} ({})",
            record.image_tag.as_deref().unwrap_or("-"),
            record
                .built_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown time".into())
        ),
        Some(record) => println!(
            "Last build:  dev only ({})",
            record.dev_image_tag.as_deref().unwrap_or("-")
        ),
        None => println!("Last build:  never"),
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub label: String,
    pub previous: String,
    pub current: String,
    pub changed: bool,
}

impl FileDiff {
    fn new(label: &str, previous: &str, current: &str) -> Self {
        Self {
            label: label.to_string(),
            previous: previous.to_string(),
            current: current.to_string(),
            changed: previous != current,
        }
    }
}

/// Compare tracked file digests against the last production build.
pub fn diff_worker(
    ctx: &CliContext,
    target: Option<&str>,
    scope: DiffScope,
) -> anyhow::Result<(String, Vec<FileDiff>)> {
    let (dir, manifest) = ctx.load_worker(target)?;
    let Some(previous) = ctx
        .records
        .load(&manifest.name)?
        .and_then(|record| record.components)
    else {
        bail!(
            "No build record for worker '{}'. Run `geoengine build` first.",
            manifest.name
        );
    };
    let current = tracked_hashes(&manifest, &dir)?;

    let mut entries = Vec::new();
    if matches!(scope, DiffScope::All | DiffScope::Manifest) {
        entries.push(FileDiff::new(MANIFEST_FILE, &previous.manifest, &current.manifest));
    }
    if matches!(scope, DiffScope::All | DiffScope::Dockerfile) {
        entries.push(FileDiff::new(
            &manifest.build.dockerfile,
            &previous.dockerfile,
            &current.dockerfile,
        ));
    }
    if matches!(scope, DiffScope::All | DiffScope::Script) {
        entries.push(FileDiff::new(
            &manifest.command.script,
            &previous.script,
            &current.script,
        ));
    }
    Ok((manifest.name, entries))
}

pub fn diff(ctx: &CliContext, args: &DiffArgs) -> anyhow::Result<ExitCode> {
    let (name, entries) = diff_worker(ctx, args.target.worker.as_deref(), args.file)?;
    println!("Changes for worker '{name}' since the last build:");
    for entry in &entries {
        if entry.changed {
            println!(
                "  changed    {}  {} -> {}",
                entry.label,
                short_hash(&entry.previous),
                short_hash(&entry.current)
            );
        } else {
            println!("  unchanged  {}", entry.label);
        }
    }
    if !entries.iter().any(|e| e.changed) {
        println!("No changes.");
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
