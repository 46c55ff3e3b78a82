// crates/server/src/routes/health.rs
//! Health check endpoint for the API.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Jobs currently pending or running.
    pub active_jobs: usize,
    pub max_jobs: usize,
    /// Registered workflow kinds, sorted.
    pub workflows: Vec<String>,
}

/// GET /api/health - Health check endpoint.
///
/// Returns server status, version, uptime and job capacity.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        active_jobs: state.store.active_count(),
        max_jobs: state.store.max_active(),
        workflows: state.workflows.kinds().into_iter().map(str::to_owned).collect(),
    })
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
