//! Project library handlers
//!
//! GET /history, GET /project/:id/status, DELETE /delete/:id,
//! GET /download/:id/:filename, GET /waveform/:id/:stem

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    models::ProjectSummary,
    services::waveform::{self, WaveformPeaks},
    AppState,
};

/// GET /project/:id/status response
#[derive(Debug, Serialize)]
pub struct ProjectStatusResponse {
    pub id: String,
    pub executed_modules: Vec<String>,
    pub original_file: Option<String>,
    pub stems: Vec<String>,
}

/// DELETE /delete/:id response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// GET /history
///
/// All projects, newest first.
pub async fn history(State(state): State<AppState>) -> Json<Vec<ProjectSummary>> {
    let projects = state.store.list().await;
    Json(projects.iter().map(|p| p.summary()).collect())
}

/// GET /project/:id/status
pub async fn project_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectStatusResponse>> {
    let project = state.store.get(&id).await?;
    Ok(Json(ProjectStatusResponse {
        stems: project.stem_list(),
        id: project.id,
        executed_modules: project.executed_modules,
        original_file: project.original_file,
    }))
}

/// DELETE /delete/:id
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    state.store.delete(&id).await?;
    info!(project_id = %id, "Project deleted via API");
    Ok(Json(DeleteResponse {
        message: format!("Project {} deleted", id),
    }))
}

/// GET /download/:id/:filename
///
/// Serves any file inside the project directory; names that escape it are
/// refused with 403.
pub async fn download_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let path = state.store.file_path(&id, &filename).await?;
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new)),
        Err(never) => match never {},
    }
}

/// GET /waveform/:id/:stem
///
/// Precomputed peaks, computed on demand when missing.
pub async fn stem_waveform(
    State(state): State<AppState>,
    Path((id, stem)): Path<(String, String)>,
) -> ApiResult<Json<WaveformPeaks>> {
    // Validates the name and that the stem exists
    state.store.file_path(&id, &stem).await?;
    let dir = state.store.project_dir(&id)?;
    let peaks = waveform::load_or_compute(dir, stem).await?;
    Ok(Json(peaks))
}

/// Build project library routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/history", get(history))
        .route("/project/:id/status", get(project_status))
        .route("/delete/:id", delete(delete_project))
        .route("/download/:id/:filename", get(download_file))
        .route("/waveform/:id/:stem", get(stem_waveform))
}
