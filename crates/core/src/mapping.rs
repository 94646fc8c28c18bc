//! Translates job inputs into container arguments, mounts and environment.
//!
//! File and folder inputs that name existing host paths are bind-mounted
//! into the container and the argument is rewritten to the container-side
//! path. Every resolved input is also exported as `GEOENGINE_INPUT_<NAME>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::MappingError;
use crate::manifest::{InputSpec, InputType, WorkerManifest};
use crate::paths::resolve_host_path;

/// Container path where the job output directory is mounted.
pub const OUTPUT_DIR_IN_CONTAINER: &str = "/output";

/// Environment variable carrying [`OUTPUT_DIR_IN_CONTAINER`].
pub const OUTPUT_DIR_ENV: &str = "GEOENGINE_OUTPUT_DIR";

/// Prefix of per-input environment variables.
pub const INPUT_ENV_PREFIX: &str = "GEOENGINE_INPUT_";

/// A single bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub readonly: bool,
}

impl Mount {
    /// `host:container[:ro]`, the Docker `HostConfig.Binds` form.
    pub fn bind_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.readonly {
            spec.push_str(":ro");
        }
        spec
    }
}

/// Everything needed to launch the worker for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInvocation {
    /// Full argv: program, script, `--flag value` pairs, then extra args.
    pub args: Vec<String>,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    /// Host directory backing [`OUTPUT_DIR_IN_CONTAINER`], if any.
    pub output_dir: Option<PathBuf>,
}

impl ResolvedInvocation {
    /// Mount `host` read-write at `/output`, replacing any static mount there.
    pub fn with_output_dir(mut self, host: &Path) -> Self {
        self.mounts.retain(|m| m.container_path != OUTPUT_DIR_IN_CONTAINER);
        self.mounts.push(Mount {
            host_path: host.to_path_buf(),
            container_path: OUTPUT_DIR_IN_CONTAINER.to_string(),
            readonly: false,
        });
        self.output_dir = Some(host.to_path_buf());
        self
    }
}

/// Split `KEY=VALUE` strings. The value may itself contain `=`.
pub fn parse_input_pairs(raw: &[String]) -> Result<BTreeMap<String, String>, MappingError> {
    raw.iter()
        .map(|item| match item.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(MappingError::Malformed(item.clone())),
        })
        .collect()
}

/// `GEOENGINE_INPUT_<NAME>` with the name upper-cased and non-alphanumerics
/// replaced by `_`.
pub fn env_var_name(input: &str) -> String {
    let suffix: String = input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{INPUT_ENV_PREFIX}{suffix}")
}

/// Check supplied inputs against the manifest without touching the filesystem.
pub fn validate_inputs(
    manifest: &WorkerManifest,
    inputs: &BTreeMap<String, String>,
) -> Result<(), MappingError> {
    if let Some(unknown) = inputs.keys().find(|k| manifest.input(k).is_none()) {
        return Err(MappingError::UnknownInput(unknown.clone()));
    }
    for spec in &manifest.command.inputs {
        match inputs.get(&spec.name) {
            Some(value) => check_choice(spec, value)?,
            None if spec.required && spec.default.is_none() => {
                return Err(MappingError::MissingRequired(spec.name.clone()));
            }
            None => {}
        }
    }
    Ok(())
}

fn check_choice(spec: &InputSpec, value: &str) -> Result<(), MappingError> {
    if spec.input_type == InputType::Enum && !spec.enum_values.iter().any(|v| v == value) {
        return Err(MappingError::InvalidChoice {
            input: spec.name.clone(),
            value: value.to_string(),
            allowed: spec.enum_values.clone(),
        });
    }
    Ok(())
}

/// Mounts declared statically in the manifest, resolved against `worker_dir`.
pub fn static_mounts(manifest: &WorkerManifest, worker_dir: &Path) -> Vec<Mount> {
    manifest
        .mounts
        .iter()
        .map(|m| Mount {
            host_path: resolve_host_path(worker_dir, &m.host_path),
            container_path: m.container_path.clone(),
            readonly: m.readonly,
        })
        .collect()
}

/// Resolve job inputs into an invocation.
///
/// Inputs are processed in manifest declaration order. Optional inputs
/// that were not supplied fall back to their default or are omitted.
pub fn resolve(
    manifest: &WorkerManifest,
    worker_dir: &Path,
    inputs: &BTreeMap<String, String>,
    extra_args: &[String],
) -> Result<ResolvedInvocation, MappingError> {
    validate_inputs(manifest, inputs)?;

    let mut args = vec![manifest.command.program.clone(), manifest.command.script.clone()];
    let mut mounts = static_mounts(manifest, worker_dir);
    let mut env = BTreeMap::new();
    let mut folder_counter = 0usize;

    for spec in &manifest.command.inputs {
        let Some(raw) = inputs.get(&spec.name).or(spec.default.as_ref()) else {
            continue;
        };

        let value = if spec.input_type.is_path() {
            map_path_input(spec, raw, &mut mounts, &mut folder_counter)?
        } else {
            raw.clone()
        };

        args.push(format!("--{}", spec.flag()));
        args.push(value.clone());
        env.insert(env_var_name(&spec.name), value);
    }

    args.extend(extra_args.iter().cloned());
    env.insert(OUTPUT_DIR_ENV.to_string(), OUTPUT_DIR_IN_CONTAINER.to_string());

    let output_dir = mounts
        .iter()
        .find(|m| m.container_path == OUTPUT_DIR_IN_CONTAINER)
        .map(|m| m.host_path.clone());

    Ok(ResolvedInvocation {
        args,
        mounts,
        env,
        output_dir,
    })
}

/// Mount an existing host path and return its container-side path.
///
/// Values that do not exist on the host are passed through unchanged so
/// workers can accept URLs or container-internal paths.
fn map_path_input(
    spec: &InputSpec,
    raw: &str,
    mounts: &mut Vec<Mount>,
    folder_counter: &mut usize,
) -> Result<String, MappingError> {
    let candidate = Path::new(raw);
    if !candidate.exists() {
        return Ok(raw.to_string());
    }
    let host = candidate.canonicalize().map_err(|source| MappingError::Path {
        input: spec.name.clone(),
        source,
    })?;

    if host.is_dir() {
        let container_path = format!("/mnt/input_{folder_counter}");
        *folder_counter += 1;
        mounts.push(Mount {
            host_path: host,
            container_path: container_path.clone(),
            readonly: spec.readonly,
        });
        Ok(container_path)
    } else {
        let file_name = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.name.clone());
        let container_path = format!("/inputs/{}/{file_name}", spec.name);
        mounts.push(Mount {
            host_path: host,
            container_path: container_path.clone(),
            readonly: spec.readonly,
        });
        Ok(container_path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn manifest(yaml: &str) -> WorkerManifest {
        WorkerManifest::parse(yaml, Path::new("geoengine.yaml")).expect("valid manifest")
    }

    fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const BUFFER: &str = r#"
name: buffer
command:
  program: python
  script: main.py
  inputs:
    - name: input
      type: file
    - name: distance
      type: number
      default: 10
    - name: units
      type: enum
      required: false
      enum_values: [m, km]
    - name: out-name
      type: string
      required: false
      map_to: output_name
mounts:
  - host_path: ./models
    container_path: /models
    readonly: true
"#;

    #[test]
    fn file_input_is_mounted_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("roads.shp");
        std::fs::write(&file, b"shp").unwrap();
        let m = manifest(BUFFER);

        let inv = resolve(
            &m,
            Path::new("/work/buffer"),
            &inputs(&[("input", file.to_str().unwrap())]),
            &[],
        )
        .unwrap();

        assert_eq!(
            inv.args,
            vec!["python", "main.py", "--input", "/inputs/input/roads.shp", "--distance", "10"]
        );
        assert_eq!(inv.mounts[0].host_path, PathBuf::from("/work/buffer/models"));
        let input_mount = &inv.mounts[1];
        assert_eq!(input_mount.host_path, file.canonicalize().unwrap());
        assert_eq!(input_mount.container_path, "/inputs/input/roads.shp");
        assert!(input_mount.readonly);
        assert_eq!(
            inv.env.get("GEOENGINE_INPUT_INPUT").map(String::as_str),
            Some("/inputs/input/roads.shp")
        );
        assert_eq!(inv.env.get(OUTPUT_DIR_ENV).map(String::as_str), Some("/output"));
    }

    #[test]
    fn folder_inputs_get_numbered_mount_points() {
        let yaml = r#"
name: merge
command:
  program: python
  script: merge.py
  inputs:
    - {name: left, type: folder}
    - {name: right, type: folder}
"#;
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let inv = resolve(
            &manifest(yaml),
            Path::new("/w"),
            &inputs(&[("left", a.path().to_str().unwrap()), ("right", b.path().to_str().unwrap())]),
            &[],
        )
        .unwrap();
        assert_eq!(inv.args[2..], ["--left", "/mnt/input_0", "--right", "/mnt/input_1"]);
    }

    #[test]
    fn nonexistent_path_passes_through() {
        let inv = resolve(
            &manifest(BUFFER),
            Path::new("/w"),
            &inputs(&[("input", "s3://bucket/roads.shp")]),
            &[],
        )
        .unwrap();
        assert_eq!(inv.args[3], "s3://bucket/roads.shp");
        assert_eq!(inv.mounts.len(), 1);
    }

    #[test]
    fn string_inputs_are_never_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let inv = resolve(
            &manifest(BUFFER),
            Path::new("/w"),
            &inputs(&[("input", "x"), ("out-name", dir.path().to_str().unwrap())]),
            &[],
        )
        .unwrap();
        assert!(inv.args.contains(&"--output_name".to_string()));
        assert!(inv.args.contains(&dir.path().to_str().unwrap().to_string()));
        assert_eq!(inv.env.get("GEOENGINE_INPUT_OUT_NAME").map(String::as_str), Some(dir.path().to_str().unwrap()));
        assert_eq!(inv.mounts.len(), 1);
    }

    #[test]
    fn extra_args_are_appended_verbatim() {
        let inv = resolve(
            &manifest(BUFFER),
            Path::new("/w"),
            &inputs(&[("input", "x")]),
            &["--verbose".to_string(), "a b".to_string()],
        )
        .unwrap();
        assert_eq!(inv.args[inv.args.len() - 2..], ["--verbose", "a b"]);
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let err = resolve(&manifest(BUFFER), Path::new("/w"), &BTreeMap::new(), &[]).unwrap_err();
        assert_matches!(err, MappingError::MissingRequired(name) if name == "input");
    }

    #[test]
    fn input_without_required_key_must_be_supplied() {
        let yaml = "name: hillshade\ncommand:\n  program: sh\n  script: r.sh\n  inputs:\n    - {name: dem, type: file}\n";
        let err = validate_inputs(&manifest(yaml), &BTreeMap::new()).unwrap_err();
        assert_matches!(err, MappingError::MissingRequired(name) if name == "dem");
    }

    #[test]
    fn unknown_input_is_rejected() {
        let err = validate_inputs(&manifest(BUFFER), &inputs(&[("input", "x"), ("dem", "y")])).unwrap_err();
        assert_matches!(err, MappingError::UnknownInput(name) if name == "dem");
    }

    #[test]
    fn enum_choice_is_checked() {
        let err = validate_inputs(&manifest(BUFFER), &inputs(&[("input", "x"), ("units", "miles")])).unwrap_err();
        assert_matches!(err, MappingError::InvalidChoice { value, .. } if value == "miles");
    }

    #[test]
    fn output_dir_replaces_static_output_mount() {
        let yaml = "name: a\ncommand: {program: sh, script: r.sh}\nmounts:\n  - {host_path: ./out, container_path: /output}\n";
        let inv = resolve(&manifest(yaml), Path::new("/w"), &BTreeMap::new(), &[]).unwrap();
        assert_eq!(inv.output_dir, Some(PathBuf::from("/w/out")));

        let inv = inv.with_output_dir(Path::new("/tmp/results"));
        let outputs: Vec<_> = inv.mounts.iter().filter(|m| m.container_path == "/output").collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].host_path, PathBuf::from("/tmp/results"));
        assert!(!outputs[0].readonly);
        assert_eq!(inv.output_dir, Some(PathBuf::from("/tmp/results")));
    }

    #[test]
    fn pairs_split_on_first_equals() {
        let parsed = parse_input_pairs(&["expr=a=b".to_string(), "n=1".to_string()]).unwrap();
        assert_eq!(parsed.get("expr").map(String::as_str), Some("a=b"));
        assert_matches!(
            parse_input_pairs(&["novalue".to_string()]),
            Err(MappingError::Malformed(raw)) if raw == "novalue"
        );
    }

    #[test]
    fn bind_spec_marks_readonly() {
        let mount = Mount {
            host_path: PathBuf::from("/data"),
            container_path: "/data".into(),
            readonly: true,
        };
        assert_eq!(mount.bind_spec(), "/data:/data:ro");
    }
}
