//! Route definitions for the `/projects` resource (registered workers).

use axum::routing::get;
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /                -> list_projects
/// GET    /{name}          -> get_project
/// GET    /{name}/tools    -> project_tools
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(projects::list_projects))
        .route("/{name}", get(projects::get_project))
        .route("/{name}/tools", get(projects::project_tools))
}
