//! Error types for stemdeck-sep

use crate::services::fetcher::FetchError;
use crate::services::mixer::MixError;
use crate::services::pipeline::PipelineError;
use crate::services::project_store::StoreError;
use crate::services::resolver::ResolveError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Path outside the project library (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) | StoreError::FileNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            StoreError::InvalidName(_) => ApiError::BadRequest(err.to_string()),
            StoreError::Forbidden(_) => ApiError::Forbidden(err.to_string()),
            StoreError::Metadata(_) | StoreError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl(_) => ApiError::BadRequest(err.to_string()),
            FetchError::Download(_) | FetchError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MixError> for ApiError {
    fn from(err: MixError) -> Self {
        match err {
            MixError::Store(store) => store.into(),
            MixError::UnknownStem(_) => ApiError::NotFound(err.to_string()),
            _ if err.is_client_error() => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Resolve(e) => e.into(),
            PipelineError::Store(e) => e.into(),
            PipelineError::Fetch(e) => e.into(),
            PipelineError::Closed => ApiError::Conflict(err.to_string()),
            PipelineError::Engine { .. }
            | PipelineError::MissingInput { .. }
            | PipelineError::Task(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
