//! Stem mixing endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{error::ApiResult, services::mixer, AppState};

/// POST /unify request
#[derive(Debug, Deserialize)]
pub struct UnifyRequest {
    /// Project id
    pub id: String,
    /// Stem filenames to combine
    #[serde(default)]
    pub tracks: Vec<String>,
}

/// POST /unify response
#[derive(Debug, Serialize)]
pub struct UnifyResponse {
    pub message: String,
    pub new_track: String,
}

/// POST /unify
///
/// Mixes the selected stems into a new `<a>+<b>.unified.wav` stem.
pub async fn unify_stems(
    State(state): State<AppState>,
    Json(request): Json<UnifyRequest>,
) -> ApiResult<Json<UnifyResponse>> {
    let new_track = mixer::unify(&state.store, &request.id, &request.tracks).await?;
    Ok(Json(UnifyResponse {
        message: format!("Unified {} stems", request.tracks.len()),
        new_track,
    }))
}

/// Build mixing routes
pub fn unify_routes() -> Router<AppState> {
    Router::new().route("/unify", post(unify_stems))
}
