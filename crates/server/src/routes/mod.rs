//! API route handlers for the crewdeck server.

pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: everything under /api plus /metrics.
///
/// Routes:
/// - GET  /api/health - Health check and job capacity
/// - POST /api/jobs - Create a job (starts it unless `defer` is set)
/// - GET  /api/jobs - List jobs, `?status=` filter
/// - POST /api/jobs/{id}/run - Start a deferred job
/// - GET  /api/jobs/{id}/status - Current job record
/// - GET  /api/jobs/{id}/result - Result once the job is terminal
/// - WS   /api/jobs/{id}/stream - Replay then live progress events
/// - GET  /api/jobs/{id}/events - SSE variant of the stream
/// - GET  /metrics - Prometheus scrape endpoint
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", stream::router())
        .nest("/api", events::router())
        .merge(metrics::router())
        .with_state(state)
}
