//! Server-Sent Events view of a job's progress.
//!
//! - `GET /api/jobs/{id}/events` - same events as the WebSocket stream
//!
//! Each SSE event is named after the job event's `type` (`status`, `log`,
//! `error`) and carries the JSON-encoded event as data. The stream ends with
//! the terminal status, which is the last event a job produces.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use crewdeck_jobs::JobEvent;
use tokio::sync::mpsc;

use crate::error::ApiResult;
use crate::routes::jobs::find_job;
use crate::routes::stream::SubscriptionGuard;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{id}/events", get(job_events))
}

fn to_sse(event: &JobEvent) -> Option<Event> {
    match Event::default().event(event.event_type()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(job_id = %event.job_id, error = %e, "failed to encode SSE event");
            None
        }
    }
}

/// GET /api/jobs/{id}/events
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = find_job(&state, &id)?;
    let job_id = job.id();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = state.broadcaster.subscribe(job_id, tx);
    let guard = SubscriptionGuard::new(Arc::clone(&state.broadcaster), job_id, subscriber);
    tracing::debug!(job_id = %job_id, subscriber, "SSE subscriber connected");

    let shutdown = state.shutdown.clone();
    let stream = async_stream::stream! {
        // Moved in so the subscription lives exactly as long as the response.
        let _guard = guard;

        loop {
            let next = tokio::select! {
                event = rx.recv() => event,
                _ = shutdown.cancelled() => None,
            };
            let Some(event) = next else { break };
            let terminal = event.is_terminal();
            if let Some(sse) = to_sse(&event) {
                yield Ok(sse);
            }
            if terminal {
                // A finished job replays its status first; its log is already queued.
                while let Ok(event) = rx.try_recv() {
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
