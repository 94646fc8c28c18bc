//! Handlers for the `/jobs` resource.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use geoengine_core::error::CoreError;
use geoengine_core::executor::OutputFile;
use geoengine_core::job::{Job, JobRequest, JobStatus};
use geoengine_core::types::{JobId, Timestamp};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Compact job view used by listings and cancellation.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub worker: String,
    pub tool: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            worker: job.worker.clone(),
            tool: job.tool.clone(),
            status: job.status,
            exit_code: job.exit_code,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct OutputResponse {
    pub job_id: JobId,
    pub output_dir: Option<PathBuf>,
    pub files: Vec<OutputFile>,
}

async fn find_job(state: &AppState, id: JobId) -> AppResult<Job> {
    state.queue.get(id).await.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })
    })
}

/// POST /api/jobs
///
/// Validate and enqueue a job. Returns 201 with the new id.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state.queue.submit(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let jobs = state.queue.list().await;
    Json(jobs.iter().map(JobSummary::from).collect())
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<JobId>) -> AppResult<Json<Job>> {
    Ok(Json(find_job(&state, id).await?))
}

/// POST /api/jobs/{id}/cancel
///
/// Cancel without purging. Returns 409 if the job already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<JobSummary>> {
    let job = state.queue.cancel(id).await?;
    Ok(Json(JobSummary::from(&job)))
}

/// DELETE /api/jobs/{id}
///
/// Cancel if still active, then purge the record.
pub async fn delete_job(State(state): State<AppState>, Path(id): Path<JobId>) -> AppResult<StatusCode> {
    state.queue.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/jobs/{id}/output
pub async fn job_output(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<OutputResponse>> {
    let job = find_job(&state, id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::BadRequest(format!(
            "Job {id} is {}, output is only available for completed jobs",
            job.status.as_str()
        )));
    }
    Ok(Json(OutputResponse {
        job_id: job.id,
        output_dir: job.output_dir,
        files: job.files,
    }))
}
