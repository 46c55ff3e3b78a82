// crates/server/src/lib.rs
//! Crewdeck server library.
//!
//! Axum HTTP server that accepts agent and content jobs, runs them in the
//! background, and streams their progress over WebSocket and SSE.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod workflows;

pub use config::{AllowedOrigins, Config};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use crewdeck_observability::{make_request_span, REQUEST_ID_HEADER};
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// CORS policy for the configured origins.
///
/// A wildcard allows any origin without credentials; an explicit list
/// allows credentials and mirrors the requested methods and headers.
pub fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    match origins {
        AllowedOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(values)
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        }
    }
}

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under /api plus /metrics
/// - CORS from the configured origins
/// - An `x-request-id` on every request, echoed on the response
/// - Request tracing tagged with that id
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

// ============================================================================
// Integration Tests
// ============================================================================
