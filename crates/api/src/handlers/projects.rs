//! Handlers for the `/projects` resource.
//!
//! A "project" is a registered worker; the name is kept for the GIS
//! plugins that predate workers.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::Json;
use geoengine_core::job::ToolDescriptor;
use geoengine_core::manifest::{PluginFlags, WorkerManifest};
use geoengine_core::settings::Settings;
use serde::Serialize;

use crate::engine::{blocking, load_registered_worker};
use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tools_count: usize,
    pub plugins: PluginFlags,
    /// Set when the manifest could not be loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectSummary {
    fn new(name: &str, path: PathBuf, manifest: &WorkerManifest) -> Self {
        Self {
            name: name.to_string(),
            path,
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            tools_count: 1,
            plugins: manifest.plugins,
            error: None,
        }
    }
}

/// GET /api/projects
///
/// Workers whose manifest no longer loads are listed with an `error`.
pub async fn list_projects(State(state): State<AppState>) -> AppResult<Json<Vec<ProjectSummary>>> {
    let store = state.settings.clone();
    let projects = blocking(move || Ok(summaries(&store.load()?))).await?;
    Ok(Json(projects))
}

fn summaries(settings: &Settings) -> Vec<ProjectSummary> {
    settings
        .list_workers()
        .map(|(name, dir)| match WorkerManifest::load_from_dir(dir) {
            Ok(manifest) => ProjectSummary::new(name, dir.to_path_buf(), &manifest),
            Err(e) => {
                tracing::warn!(worker = %name, error = %e, "Registered worker has an invalid manifest");
                ProjectSummary {
                    name: name.to_string(),
                    path: dir.to_path_buf(),
                    version: None,
                    description: None,
                    tools_count: 0,
                    plugins: PluginFlags::default(),
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}

/// GET /api/projects/{name}
pub async fn get_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ProjectSummary>> {
    let (dir, manifest) = load_registered_worker(&state.settings, &name).await?;
    Ok(Json(ProjectSummary::new(&name, dir, &manifest)))
}

/// GET /api/projects/{name}/tools
pub async fn project_tools(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Vec<ToolDescriptor>>> {
    let (_, manifest) = load_registered_worker(&state.settings, &name).await?;
    Ok(Json(vec![ToolDescriptor::from(&manifest)]))
}
