//! stemdeck-sep library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use services::{ModuleRegistry, Pipeline, ProjectStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemdeck_common::events::ProgressBus;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog of separation modules
    pub registry: Arc<ModuleRegistry>,
    /// Project library on disk
    pub store: Arc<ProjectStore>,
    /// Per-job event fan-out for SSE
    pub bus: ProgressBus,
    /// Plan executor
    pub pipeline: Arc<Pipeline>,
    /// Where uploads are staged before a project exists
    pub uploads_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        store: Arc<ProjectStore>,
        bus: ProgressBus,
        pipeline: Arc<Pipeline>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            pipeline,
            uploads_dir,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::module_routes())
        .merge(api::process_routes())
        .merge(api::project_routes())
        .merge(api::unify_routes())
        .merge(api::job_routes())
        .route("/sse/:job_id", get(api::job_event_stream))
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Remove files left in the uploads folder by a previous run
///
/// Nothing in there belongs to a live job at start-up. Returns how many
/// entries were removed.
pub fn clean_stale_uploads(uploads_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(uploads_dir)? {
        let path = entry?.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale upload {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        info!("Removed {} stale upload(s)", removed);
    }
    Ok(removed)
}
