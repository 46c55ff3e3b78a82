// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crewdeck_jobs::{JobError, JobId, JobStatus};
use serde::Serialize;
use thiserror::Error;

use crate::workflows::ValidationError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many active jobs ({limit} max)")]
    TooManyJobs { limit: usize },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job {id} has not finished (status: {status})")]
    NotFinished { id: JobId, status: JobStatus },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::JobNotFound(id.to_string()),
            JobError::Capacity { limit } => ApiError::TooManyJobs { limit },
            conflict @ (JobError::Conflict { .. } | JobError::Finished { .. }) => {
                ApiError::Conflict(conflict.to_string())
            }
            JobError::ShuttingDown => ApiError::ShuttingDown,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::TooManyJobs { limit } => {
                tracing::warn!(limit, "Job rejected: capacity reached");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorResponse::with_details(
                        "Too many active jobs",
                        format!("At most {limit} jobs may be pending or running; try again later"),
                    ),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Conflict", msg.clone()),
                )
            }
            ApiError::NotFinished { id, status } => {
                tracing::debug!(job_id = %id, status = %status, "Result requested before job finished");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details(
                        "Job not finished",
                        format!("Job {id} is still {status}"),
                    ),
                )
            }
            ApiError::ShuttingDown => {
                tracing::info!("Request refused: server shutting down");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::with_details(
                        "Service unavailable",
                        "Server is shutting down; no new jobs are accepted",
                    ),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.0)
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
