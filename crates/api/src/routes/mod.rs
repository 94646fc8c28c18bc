pub mod health;
pub mod jobs;
pub mod projects;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                            service health
///
/// /jobs                              list, submit
/// /jobs/{id}                         get, delete
/// /jobs/{id}/cancel                  cancel (POST)
/// /jobs/{id}/output                  output files of a completed job
///
/// /projects                          registered workers
/// /projects/{name}                   worker summary
/// /projects/{name}/tools             tool table for GIS clients
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/jobs", jobs::router())
        .nest("/projects", projects::router())
}
