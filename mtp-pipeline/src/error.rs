//! Error types for the pipeline HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::OrchestratorError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// 404 Not Found
    #[error("Not found: {0}")]
    NotFound(String),

    /// 400 Bad Request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 409 Conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 500 Internal Server Error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Common library error
    #[error("Common error: {0}")]
    Common(#[from] mtp_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(err) => match err {
                mtp_common::Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                mtp_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
                }
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        if status.is_server_error() {
            tracing::error!(code, message = %message, "API request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            OrchestratorError::JobNotFound(id) => ApiError::NotFound(format!("Job {}", id)),
            OrchestratorError::JobTerminal(id) => {
                ApiError::Conflict(format!("Job {} is already terminal", id))
            }
            OrchestratorError::Store(e) => ApiError::Common(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
