//! Per-job subscriber registry with replay-on-subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::store::JobStore;
use crate::types::{JobEvent, JobId};

/// Identifies one registered connection within the broadcaster.
pub type SubscriberId = u64;

/// Sending half handed over by a connection (WebSocket forwarder, SSE stream, test).
pub type EventSender = mpsc::UnboundedSender<JobEvent>;

struct Subscriber {
    id: SubscriberId,
    tx: EventSender,
    /// Job revision already delivered through replay, if the job existed
    /// when the subscriber joined.
    watermark: Option<u64>,
}

/// Fans job events out to every connection subscribed to that job.
///
/// Subscribing takes the job snapshot while holding the registry lock, and
/// publishing takes the same lock, so a subscriber joining mid-run sees the
/// full history first and then only events newer than that history.
pub struct ProgressBroadcaster {
    store: Arc<JobStore>,
    next_id: AtomicU64,
    registry: Mutex<HashMap<JobId, Vec<Subscriber>>>,
}

impl ProgressBroadcaster {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Vec<Subscriber>>> {
        self.registry.lock().unwrap_or_else(|poisoned| {
            tracing::error!("subscriber registry mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Register `tx` for events about `job_id`.
    ///
    /// When the job exists, its current status and log history are sent on
    /// `tx` before any live event. An unknown job is tolerated: the
    /// subscriber simply waits for events.
    pub fn subscribe(&self, job_id: JobId, tx: EventSender) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.lock();

        let mut watermark = None;
        if let Ok(job) = self.store.get(job_id) {
            watermark = Some(job.revision());
            for event in JobEvent::replay(&job) {
                if tx.send(event).is_err() {
                    tracing::debug!(job_id = %job_id, subscriber = id, "subscriber left during replay");
                    return id;
                }
            }
        }

        registry
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, tx, watermark });
        tracing::debug!(job_id = %job_id, subscriber = id, watermark = ?watermark, "subscriber registered");
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, job_id: JobId, subscriber: SubscriberId) {
        let mut registry = self.lock();
        if let Some(subs) = registry.get_mut(&job_id) {
            subs.retain(|s| s.id != subscriber);
            if subs.is_empty() {
                registry.remove(&job_id);
            }
        }
    }

    /// Deliver `event` to every subscriber of `job_id`. Returns how many
    /// subscribers received it.
    ///
    /// A subscriber whose channel is closed is dropped from the registry;
    /// the others still get the event.
    pub fn publish(&self, job_id: JobId, event: JobEvent) -> usize {
        let mut registry = self.lock();
        let Some(subs) = registry.get_mut(&job_id) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|sub| {
            if sub.watermark.is_some_and(|w| event.seq <= w) {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    let err = DeliveryError {
                        job_id,
                        subscriber: sub.id,
                    };
                    tracing::warn!(error = %err, "dropping subscriber after failed send");
                    false
                }
            }
        });
        if subs.is_empty() {
            registry.remove(&job_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.lock().get(&job_id).map_or(0, Vec::len)
    }
}
