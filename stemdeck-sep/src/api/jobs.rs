//! Job status endpoint
//!
//! Lets a client that lost its SSE connection find out where a job stands.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::{ApiError, ApiResult},
    models::JobRecord,
    AppState,
};

/// GET /jobs/:job_id
///
/// Accepts either the temporary job id or the project id it was promoted to.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    state
        .pipeline
        .jobs()
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// Build job status routes
pub fn job_routes() -> Router<AppState> {
    Router::new().route("/jobs/:job_id", get(job_status))
}
