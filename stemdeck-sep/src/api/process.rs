//! Job submission handlers
//!
//! POST /process, POST /process-url, POST /project/:id/run-modules
//!
//! Each handler validates and resolves the request before anything runs, then
//! waits for the job to finish. Progress is only available over
//! GET /sse/:job_id; a client that disconnects here does not stop the job.

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::{
    error::{ApiError, ApiResult},
    models::ProjectSummary,
    services::{RunHandle, Source},
    utils::sanitize_filename,
    AppState,
};

/// Response of every submission endpoint
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// Job id the progress stream was published under
    pub job_id: String,
    /// Modules this job ran, in execution order
    pub plan: Vec<String>,
    #[serde(flatten)]
    pub project: ProjectSummary,
}

/// POST /process-url request
#[derive(Debug, Deserialize)]
pub struct ProcessUrlRequest {
    pub url: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub temp_project_id: Option<String>,
}

/// POST /project/:id/run-modules request
#[derive(Debug, Deserialize)]
pub struct RunModulesRequest {
    #[serde(default)]
    pub modules: Vec<String>,
}

async fn finish(handle: RunHandle) -> ApiResult<Json<RunResponse>> {
    let summary = handle.wait().await?;
    Ok(Json(RunResponse {
        job_id: summary.job_id,
        plan: summary.plan,
        project: summary.project.summary(),
    }))
}

/// Stream one multipart field to disk
async fn save_field(field: &mut Field<'_>, path: &std::path::Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn discard(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), "Upload already removed: {}", e);
    }
}

/// Fields collected from a POST /process body
#[derive(Default)]
struct UploadForm {
    upload: Option<(PathBuf, String)>,
    modules: Vec<String>,
    temp_project_id: Option<String>,
}

async fn read_form(state: &AppState, multipart: &mut Multipart, form: &mut UploadForm) -> ApiResult<()> {
    let bad_body = |e: axum::extract::multipart::MultipartError| {
        ApiError::BadRequest(format!("Invalid multipart body: {}", e))
    };

    while let Some(mut field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let original = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let path = state.uploads_dir.join(format!(
                    "{}_{}",
                    uuid::Uuid::new_v4(),
                    sanitize_filename(&original)
                ));
                // Record before writing so a failed write is still cleaned up
                form.upload = Some((path.clone(), original));
                let bytes = save_field(&mut field, &path).await?;
                debug!(path = %path.display(), bytes, "Upload saved");
            }
            "modules" => {
                let text = field.text().await.map_err(bad_body)?;
                form.modules = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("modules must be a JSON array: {}", e)))?;
            }
            "temp_project_id" => {
                form.temp_project_id = Some(field.text().await.map_err(bad_body)?);
            }
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }
    Ok(())
}

/// POST /process
///
/// Multipart fields: `file`, `modules` (JSON array of module ids) and
/// `temp_project_id` (the id the client subscribed to on /sse).
pub async fn process_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<RunResponse>> {
    let mut form = UploadForm::default();
    let read = read_form(&state, &mut multipart, &mut form).await;

    let Some((path, display_name)) = form.upload else {
        read?;
        return Err(ApiError::BadRequest("No file provided".to_string()));
    };
    if let Err(e) = read {
        discard(&path).await;
        return Err(e);
    }

    info!(file = %display_name, modules = ?form.modules, "Upload received");
    let submitted = state.pipeline.submit_new(
        form.temp_project_id,
        Source::Upload {
            path: path.clone(),
            display_name,
        },
        &form.modules,
    );
    match submitted {
        Ok(handle) => finish(handle).await,
        Err(e) => {
            discard(&path).await;
            Err(e.into())
        }
    }
}

/// POST /process-url
pub async fn process_url(
    State(state): State<AppState>,
    Json(request): Json<ProcessUrlRequest>,
) -> ApiResult<Json<RunResponse>> {
    info!(url = %request.url, modules = ?request.modules, "URL job received");
    let handle = state.pipeline.submit_new(
        request.temp_project_id,
        Source::Url(request.url),
        &request.modules,
    )?;
    finish(handle).await
}

/// POST /project/:id/run-modules
///
/// Runs further modules on an existing project. The job id is the project id.
pub async fn run_modules(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<RunModulesRequest>,
) -> ApiResult<Json<RunResponse>> {
    let handle = state
        .pipeline
        .submit_project(&project_id, &request.modules)
        .await?;
    finish(handle).await
}

/// Build job submission routes
pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/process",
            post(process_upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/process-url", post(process_url))
        .route("/project/:id/run-modules", post(run_modules))
}
