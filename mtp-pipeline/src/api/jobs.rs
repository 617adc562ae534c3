//! Job API handlers
//!
//! POST /jobs, GET /jobs, GET /jobs/:job_id, POST /jobs/:job_id/cancel,
//! GET /jobs/:job_id/contexts[/:transition]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    models::{ContextSnapshot, ContextTransition, JobDocument, JobSummary},
    services::JobRequest,
    AppState,
};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 500;

/// GET /jobs query
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

/// POST /jobs
///
/// Validates the selection, persists the seeded document and starts the
/// pipeline in the background. Returns 202 Accepted with the seeded job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<JobDocument>)> {
    let job = state
        .orchestrator
        .submit(request)
        .await
        .map_err(ApiError::from);

    match job {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        Err(e) => {
            if matches!(e, ApiError::Internal(_) | ApiError::Common(_)) {
                state.record_error(&e).await;
            }
            Err(e)
        }
    }
}

/// GET /jobs?limit=N
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state.store.list_recent(limit).await?;
    Ok(Json(jobs))
}

/// GET /jobs/:job_id
///
/// Persisted document with in-flight analyzers shown as `processing`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDocument>> {
    let job = state
        .orchestrator
        .job_status(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;
    Ok(Json(job))
}

/// POST /jobs/:job_id/cancel
///
/// 409 Conflict when the job already reached a terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobDocument>)> {
    let job = state.orchestrator.cancel(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /jobs/:job_id/contexts
pub async fn list_contexts(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Vec<ContextSnapshot>>> {
    if state.store.get(&job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job not found: {}", job_id)));
    }
    Ok(Json(state.contexts.list(&job_id).await?))
}

/// GET /jobs/:job_id/contexts/:transition
pub async fn get_context(
    State(state): State<AppState>,
    Path((job_id, transition)): Path<(String, String)>,
) -> ApiResult<Json<ContextSnapshot>> {
    let transition: ContextTransition = transition.parse()?;
    let snapshot = state
        .contexts
        .fetch(&job_id, transition)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No {} context recorded for job {}", transition, job_id))
        })?;
    Ok(Json(snapshot))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/contexts", get(list_contexts))
        .route("/jobs/:job_id/contexts/:transition", get(get_context))
}
