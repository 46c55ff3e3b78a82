//! WebSocket progress stream for a single job.
//!
//! - `WS /api/jobs/{id}/stream` -- replay of the job so far, then live events
//!
//! Each text frame is one JSON-encoded `JobEvent`. Unknown jobs get an error
//! frame followed by close code 4004.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use crewdeck_jobs::{JobId, ProgressBroadcaster, SubscriberId};
use tokio::sync::mpsc;

use crate::metrics::record_stream_subscribers;
use crate::routes::jobs::find_job;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Close code sent when the requested job does not exist.
pub const CLOSE_UNKNOWN_JOB: u16 = 4004;

/// RAII guard that unregisters a subscriber when the connection goes away,
/// including when the handler task is cancelled at shutdown.
pub(crate) struct SubscriptionGuard {
    broadcaster: Arc<ProgressBroadcaster>,
    job_id: JobId,
    subscriber: SubscriberId,
}

impl SubscriptionGuard {
    pub(crate) fn new(
        broadcaster: Arc<ProgressBroadcaster>,
        job_id: JobId,
        subscriber: SubscriberId,
    ) -> Self {
        record_stream_subscribers(1.0);
        Self {
            broadcaster,
            job_id,
            subscriber,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.job_id, self.subscriber);
        record_stream_subscribers(-1.0);
        tracing::debug!(
            job_id = %self.job_id,
            subscriber = self.subscriber,
            "subscription dropped"
        );
    }
}

/// Build the stream sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{id}/stream", get(ws_stream_handler))
}

/// HTTP upgrade handler -- resolves the job, then upgrades to WebSocket.
async fn ws_stream_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let job_id = match find_job(&state, &id) {
        Ok(job) => job.id(),
        Err(_) => {
            return ws.on_upgrade(move |mut socket| async move {
                let err_msg = serde_json::json!({
                    "type": "error",
                    "message": format!("Job '{}' not found", id),
                });
                let _ = socket.send(Message::Text(err_msg.to_string().into())).await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_UNKNOWN_JOB,
                        reason: "Job not found".into(),
                    })))
                    .await;
            });
        }
    };

    ws.on_upgrade(move |socket| handle_stream(socket, state, job_id))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<AppState>, job_id: JobId) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = state.broadcaster.subscribe(job_id, tx);
    let _guard = SubscriptionGuard::new(Arc::clone(&state.broadcaster), job_id, subscriber);

    tracing::info!(job_id = %job_id, subscriber, "job stream connected");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // Skip the first immediate tick
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    tracing::debug!(job_id = %job_id, "subscriber channel closed");
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "failed to encode job event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(job_id = %job_id, "client disconnected during stream");
                    break;
                }
            }

            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        if is_ping(text.as_str()) {
                            let pong = serde_json::json!({ "type": "pong" });
                            let _ = socket.send(Message::Text(pong.to_string().into())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(job_id = %job_id, error = %e, "websocket receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = state.shutdown.cancelled() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    tracing::debug!(job_id = %job_id, "heartbeat failed, closing stream");
                    break;
                }
            }
        }
    }

    tracing::info!(job_id = %job_id, subscriber, "job stream disconnected");
}

/// Clients may keep the connection warm with `ping` or `{"type":"ping"}`.
fn is_ping(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("ping")
        || serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
            .unwrap_or(false)
}
