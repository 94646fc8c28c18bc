//! Job data model shared by the queue service and its clients.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::executor::OutputFile;
use crate::manifest::{InputSpec, WorkerManifest};
use crate::types::{JobId, Timestamp};

/// Lifecycle state of a job.
///
/// `Queued -> Running -> {Completed | Failed | Cancelled}`, or
/// `Queued -> Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    #[serde(alias = "project")]
    pub worker: String,
    /// Defaults to the worker name; each worker exposes one tool.
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl JobRequest {
    /// Inputs flattened to the string form passed to the container.
    ///
    /// Strings are used verbatim, numbers and booleans are formatted, and
    /// nulls are dropped so the manifest default applies.
    pub fn string_inputs(&self) -> BTreeMap<String, String> {
        self.inputs
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect()
    }
}

/// A submitted job and everything known about it so far.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub worker: String,
    pub tool: String,
    pub status: JobStatus,
    pub inputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files: Vec<OutputFile>,
    /// Most recent output lines, oldest first.
    pub logs: VecDeque<String>,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl Job {
    pub fn new(request: &JobRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            worker: request.worker.clone(),
            tool: request.tool.clone().unwrap_or_else(|| request.worker.clone()),
            status: JobStatus::Queued,
            inputs: request.string_inputs(),
            output_dir: request.output_dir.clone(),
            exit_code: None,
            error: None,
            files: Vec::new(),
            logs: VecDeque::new(),
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One row of the tool table served to GIS clients.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub worker: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<InputSpec>,
}

impl From<&WorkerManifest> for ToolDescriptor {
    fn from(manifest: &WorkerManifest) -> Self {
        Self {
            worker: manifest.name.clone(),
            name: manifest.name.clone(),
            description: manifest.description.clone(),
            inputs: manifest.command.inputs.clone(),
        }
    }
}
