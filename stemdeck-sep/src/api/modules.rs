//! Module catalog endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// One entry of GET /modules
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub description: String,
    pub category: String,
    pub depends_on: Option<String>,
}

/// GET /modules
///
/// Registry listing in catalog order.
pub async fn list_modules(State(state): State<AppState>) -> Json<Vec<ModuleInfo>> {
    let modules = state
        .registry
        .list()
        .iter()
        .map(|m| ModuleInfo {
            id: m.id.clone(),
            description: m.description.clone(),
            category: m.category.clone(),
            depends_on: m.depends_on.clone(),
        })
        .collect();
    Json(modules)
}

/// Build module catalog routes
pub fn module_routes() -> Router<AppState> {
    Router::new().route("/modules", get(list_modules))
}
