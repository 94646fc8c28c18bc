//! Worker manifest (`geoengine.yaml`) model and validation.
//!
//! The file is deserialized into derive structs and then checked
//! semantically: required fields, input types, defaults against their
//! type and enum choices. Failures name the offending key path
//! (`command.inputs.format.default`).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::paths::MANIFEST_FILE;

/// Dockerfile used when the manifest has no `build.dockerfile`.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Declared type of a worker input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    File,
    Folder,
    String,
    Number,
    Boolean,
    Enum,
    Datetime,
}

impl InputType {
    pub const ALL: [InputType; 7] = [
        Self::File,
        Self::Folder,
        Self::String,
        Self::Number,
        Self::Boolean,
        Self::Enum,
        Self::Datetime,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Enum => "enum",
            Self::Datetime => "datetime",
        }
    }

    /// Values of this type may name host paths that need mounting.
    pub fn is_path(self) -> bool {
        matches!(self, Self::File | Self::Folder)
    }
}

/// One declared input of a worker's command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub required: bool,
    /// Default value, normalized to the string form passed to the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Command-line flag name; defaults to `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_to: Option<String>,
    /// Mount file and folder inputs read-only.
    pub readonly: bool,
}

impl InputSpec {
    /// Flag name emitted on the container command line (without `--`).
    pub fn flag(&self) -> &str {
        self.map_to.as_deref().unwrap_or(&self.name)
    }
}

/// The program the container runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub script: String,
    pub inputs: Vec<InputSpec>,
}

/// A static host-to-container bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    #[serde(alias = "host")]
    pub host_path: String,
    #[serde(alias = "container")]
    pub container_path: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Image build settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSpec {
    pub dockerfile: String,
    pub context: String,
    #[serde(deserialize_with = "scalar::map")]
    pub args: BTreeMap<String, String>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            dockerfile: DEFAULT_DOCKERFILE.to_string(),
            context: ".".to_string(),
            args: BTreeMap::new(),
        }
    }
}

/// GIS integration flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginFlags {
    pub arcgis: bool,
    pub qgis: bool,
}

/// Cloud deployment target. Only the tenant is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySpec {
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "scalar::optional"
    )]
    pub tenant_id: Option<String>,
}

/// A validated worker manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerManifest {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub command: CommandSpec,
    pub build: BuildSpec,
    pub mounts: Vec<MountSpec>,
    pub plugins: PluginFlags,
    pub deploy: DeploySpec,
}

impl WorkerManifest {
    /// Load `geoengine.yaml` from a worker directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(MANIFEST_FILE))
    }

    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Validate manifest text. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let tree: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        match tree {
            Value::Mapping(_) => {}
            Value::Null => {
                return Err(ConfigError::Missing {
                    field: "name".into(),
                })
            }
            other => {
                return Err(ConfigError::InvalidType {
                    field: "<root>".into(),
                    message: format!("expected a mapping, found {}", type_name(&other)),
                })
            }
        }
        let raw: RawManifest = serde_yaml::from_str(content).map_err(shape_error)?;
        raw.validate()
    }

    pub fn dockerfile_path(&self, worker_dir: &Path) -> PathBuf {
        worker_dir.join(&self.build.dockerfile)
    }

    pub fn context_path(&self, worker_dir: &Path) -> PathBuf {
        worker_dir.join(&self.build.context)
    }

    pub fn script_path(&self, worker_dir: &Path) -> PathBuf {
        worker_dir.join(&self.command.script)
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.command.inputs.iter().find(|i| i.name == name)
    }

    /// Canonical JSON of the fields that affect the built image.
    ///
    /// Version and description are excluded so that bumping the version
    /// alone does not count as a content change.
    pub fn build_relevant_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "build": self.build,
            "command": self.command,
        })
    }

    /// Starter manifest written by `geoengine init`.
    pub fn template(name: &str) -> String {
        format!(
            r#"name: {name}
version: "1.0.0"
description: "Describe what {name} does"

command:
  program: python
  script: main.py
  inputs:
    - name: input
      type: file
      description: "Input dataset"
    - name: buffer
      type: number
      required: false
      default: 10
      description: "Buffer distance in metres"

build:
  dockerfile: Dockerfile

mounts:
  - host_path: ./data
    container_path: /data
    readonly: true

plugins:
  arcgis: false
  qgis: false
"#
        )
    }
}

// ---------------------------------------------------------------------------
// On-disk shape
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional")]
    version: Option<String>,
    description: Option<String>,
    command: Option<RawCommand>,
    #[serde(default)]
    build: BuildSpec,
    #[serde(default)]
    local_dir_mounts: Vec<MountSpec>,
    #[serde(default)]
    mounts: Vec<MountSpec>,
    #[serde(default, alias = "gis")]
    plugins: PluginFlags,
    #[serde(default)]
    deploy: DeploySpec,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    program: Option<String>,
    script: Option<String>,
    #[serde(default)]
    inputs: Vec<RawInput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    name: Option<String>,
    #[serde(rename = "type")]
    input_type: Option<String>,
    #[serde(default = "default_true")]
    required: bool,
    default: Option<Value>,
    description: Option<String>,
    #[serde(default, deserialize_with = "scalar::list")]
    enum_values: Vec<String>,
    map_to: Option<String>,
    #[serde(default = "default_true")]
    readonly: bool,
}

impl RawManifest {
    fn validate(self) -> Result<WorkerManifest, ConfigError> {
        let name = required(self.name, "name")?;
        let command = match self.command {
            Some(command) => command.validate()?,
            None => {
                return Err(ConfigError::Missing {
                    field: "command.program".into(),
                })
            }
        };
        let mut mounts = self.local_dir_mounts;
        mounts.extend(self.mounts);

        Ok(WorkerManifest {
            name,
            version: self.version,
            description: self.description,
            command,
            build: self.build,
            mounts,
            plugins: self.plugins,
            deploy: self.deploy,
        })
    }
}

impl RawCommand {
    fn validate(self) -> Result<CommandSpec, ConfigError> {
        let program = required(self.program, "command.program")?;
        let script = required(self.script, "command.script")?;

        let mut seen = HashSet::new();
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (idx, raw) in self.inputs.into_iter().enumerate() {
            let input = raw.validate(idx)?;
            if !seen.insert(input.name.clone()) {
                return Err(ConfigError::Duplicate(input.name));
            }
            inputs.push(input);
        }

        Ok(CommandSpec {
            program,
            script,
            inputs,
        })
    }
}

impl RawInput {
    fn validate(self, idx: usize) -> Result<InputSpec, ConfigError> {
        let name = required(self.name, &format!("command.inputs[{idx}].name"))?;
        let field = |key: &str| format!("command.inputs.{name}.{key}");

        let raw_type = required(self.input_type, &field("type"))?;
        let input_type = InputType::parse(&raw_type).ok_or_else(|| ConfigError::InvalidType {
            field: field("type"),
            message: format!(
                "expected one of file, folder, string, number, boolean, enum, datetime, found `{raw_type}`"
            ),
        })?;

        if input_type == InputType::Enum && self.enum_values.is_empty() {
            return Err(ConfigError::InvalidEnum {
                field: field("enum_values"),
                value: String::new(),
                allowed: Vec::new(),
            });
        }

        let default = match self.default.as_ref().filter(|v| !v.is_null()) {
            Some(value) => Some(normalize_default(
                &field("default"),
                input_type,
                &self.enum_values,
                value,
            )?),
            None => None,
        };

        Ok(InputSpec {
            name,
            input_type,
            required: self.required,
            default,
            description: self.description,
            enum_values: self.enum_values,
            map_to: self.map_to,
            readonly: self.readonly,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ConfigError> {
    value
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing {
            field: field.to_string(),
        })
}

/// Map a serde shape error (`command.inputs[0].required: invalid type ...`)
/// onto the key path it names.
fn shape_error(err: serde_yaml::Error) -> ConfigError {
    let message = err.to_string();
    match message.split_once(": ") {
        Some((path, rest)) if !path.contains(' ') => ConfigError::InvalidType {
            field: path.to_string(),
            message: rest.to_string(),
        },
        _ => ConfigError::InvalidType {
            field: "<root>".into(),
            message,
        },
    }
}

fn normalize_default(
    field: &str,
    input_type: InputType,
    enum_values: &[String],
    value: &Value,
) -> Result<String, ConfigError> {
    let invalid = |expected: &str| ConfigError::InvalidType {
        field: field.to_string(),
        message: format!("expected {expected}, found {}", type_name(value)),
    };
    match input_type {
        InputType::Number => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(s.trim().to_string()),
            _ => Err(invalid("a number")),
        },
        InputType::Boolean => match value {
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") => {
                Ok(s.to_ascii_lowercase())
            }
            _ => Err(invalid("a boolean")),
        },
        InputType::Datetime => match value {
            Value::String(s) if is_datetime(s) => Ok(s.clone()),
            _ => Err(invalid("an RFC 3339 datetime or YYYY-MM-DD date")),
        },
        InputType::Enum => {
            let raw = scalar::to_text(value).ok_or_else(|| invalid("a scalar"))?;
            if enum_values.contains(&raw) {
                Ok(raw)
            } else {
                Err(ConfigError::InvalidEnum {
                    field: field.to_string(),
                    value: raw,
                    allowed: enum_values.to_vec(),
                })
            }
        }
        InputType::String | InputType::File | InputType::Folder => {
            scalar::to_text(value).ok_or_else(|| invalid("a scalar"))
        }
    }
}

/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS` and plain dates.
pub fn is_datetime(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Deserializers that accept any YAML scalar as text, so `version: 1.0`
/// and `GDAL_VERSION: 3.8` keep their written form.
mod scalar {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_yaml::Value;

    pub fn to_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn expect_scalar<E: Error>(value: &Value) -> Result<String, E> {
        to_text(value)
            .ok_or_else(|| E::custom(format!("expected a scalar, found {}", super::type_name(value))))
    }

    pub fn optional<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        match Option::<Value>::deserialize(de)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => expect_scalar(&value).map(Some),
        }
    }

    pub fn list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        Vec::<Value>::deserialize(de)?
            .iter()
            .map(expect_scalar)
            .collect()
    }

    pub fn map<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, String>, D::Error> {
        BTreeMap::<String, Value>::deserialize(de)?
            .into_iter()
            .map(|(key, value)| Ok((key, expect_scalar(&value)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
