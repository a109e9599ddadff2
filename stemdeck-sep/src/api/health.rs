//! Liveness and a small snapshot of service load

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Projects in the library
    pub projects: usize,
    /// Runs not yet done or failed
    pub active_jobs: usize,
    /// Progress channels held by the bus
    pub event_channels: usize,
    pub modules: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.startup_time).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok",
        module: "stemdeck-sep",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        projects: state.store.list().await.len(),
        active_jobs: state.pipeline.jobs().active_count(),
        event_channels: state.bus.channel_count(),
        modules: state.registry.list().len(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
