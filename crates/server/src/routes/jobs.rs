// crates/server/src/routes/jobs.rs
//! Job submission and inspection.
//!
//! - POST /jobs - Create a job (and start it unless `defer` is set)
//! - POST /jobs/{id}/run - Start a deferred job
//! - GET /jobs - List jobs, optionally filtered by `?status=`
//! - GET /jobs/{id}/status - Current job record
//! - GET /jobs/{id}/result - Result or error once the job is terminal

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use crewdeck_jobs::{Job, JobId, JobSnapshot, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_validation_rejection;
use crate::state::AppState;
use crate::workflows::Workflow;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct RunJobResponse {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunJobRequest {
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobResultResponse {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Split a create body into `(kind, defer, input)`.
///
/// Accepts `{kind?, defer?, input}` or a flat payload such as
/// `{"topic": "space travel"}`, where everything except `kind`/`defer` is
/// the input.
fn split_create_body(body: Value) -> ApiResult<(Option<String>, bool, Value)> {
    let Value::Object(mut fields) = body else {
        return Err(ApiError::BadRequest("Request body must be a JSON object".into()));
    };
    let kind = match fields.remove("kind") {
        None | Some(Value::Null) => None,
        Some(Value::String(kind)) => Some(kind),
        Some(_) => return Err(ApiError::BadRequest("'kind' must be a string".into())),
    };
    let defer = match fields.remove("defer") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(defer)) => defer,
        Some(_) => return Err(ApiError::BadRequest("'defer' must be a boolean".into())),
    };
    let input = fields.remove("input").unwrap_or(Value::Object(fields));
    Ok((kind, defer, input))
}

/// Parse a path id and fetch the job. Malformed ids are unknown ids.
pub(crate) fn find_job(state: &AppState, raw_id: &str) -> ApiResult<Job> {
    let id: JobId = raw_id
        .parse()
        .map_err(|_| ApiError::JobNotFound(raw_id.to_string()))?;
    Ok(state.store.get(id)?)
}

fn start(
    state: &AppState,
    id: JobId,
    workflow: Arc<dyn Workflow>,
    input: Option<Value>,
) -> ApiResult<Job> {
    let job = state
        .runner
        .run(id, input, move |ctx| async move { workflow.execute(ctx).await })?;
    Ok(job)
}

/// POST /api/jobs - Validate input and create a job.
///
/// The body is parsed here rather than by the `Json` extractor so that a
/// malformed body or a missing content type still gets a JSON error.
async fn create_job(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    if state.runner.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let (kind, defer, input) = split_create_body(body)?;
    let workflow = state.workflows.resolve(kind.as_deref())?;
    let input = workflow.validate(input).inspect_err(|e| {
        record_validation_rejection(workflow.kind());
        tracing::debug!(kind = workflow.kind(), error = %e, "job input rejected");
    })?;

    let job = state.store.create(workflow.kind(), input)?;
    let response = CreateJobResponse {
        id: job.id(),
        kind: job.kind().to_string(),
        status: job.status(),
    };
    if !defer {
        start(&state, job.id(), workflow, None)?;
    }
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/jobs/{id}/run - Start a job created with `defer: true`.
async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<RunJobResponse>)> {
    let job = find_job(&state, &id)?;
    if job.status() != JobStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "Job {} is already {}",
            job.id(),
            job.status()
        )));
    }

    let request: RunJobRequest = if body.is_empty() {
        RunJobRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid run request: {e}")))?
    };

    let workflow = state.workflows.get(job.kind()).ok_or_else(|| {
        ApiError::Internal(format!("no workflow registered for kind '{}'", job.kind()))
    })?;
    let input = request
        .input
        .map(|input| workflow.validate(input))
        .transpose()?;

    let job = start(&state, job.id(), workflow, input)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunJobResponse {
            id: job.id(),
            status: job.status(),
        }),
    ))
}

/// GET /api/jobs - All jobs, newest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobSnapshot>>> {
    let filter = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let jobs = state
        .store
        .list()
        .iter()
        .filter(|job| filter.map_or(true, |status| job.status() == status))
        .map(Job::snapshot)
        .collect();
    Ok(Json(jobs))
}

/// GET /api/jobs/{id}/status
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(find_job(&state, &id)?.snapshot()))
}

/// GET /api/jobs/{id}/result
async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResultResponse>> {
    let job = find_job(&state, &id)?;
    if !job.is_terminal() {
        return Err(ApiError::NotFinished {
            id: job.id(),
            status: job.status(),
        });
    }
    Ok(Json(JobResultResponse {
        id: job.id(),
        kind: job.kind().to_string(),
        status: job.status(),
        result: job.result().cloned(),
        error: job.error().map(str::to_owned),
        completed_at: job.completed_at(),
    }))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}/run", post(run_job))
        .route("/jobs/{id}/status", get(job_status))
        .route("/jobs/{id}/result", get(job_result))
}
