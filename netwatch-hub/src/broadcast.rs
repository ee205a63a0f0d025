/**
 * BROADCASTER - Subscriber registry and best-effort fan-out
 *
 * ROLE: tells every registered subscriber that a source's latest state
 * changed. Subscribers are bounded `mpsc` channels; the transport task on the
 * other end (the WebSocket handler) drains them.
 *
 * DELIVERY:
 * - events are enqueued with `try_send`, the broadcaster never waits on a
 *   subscriber
 * - a closed channel (gone) or a full one (too slow to keep up) gets the
 *   subscriber evicted during the broadcast that noticed it
 * - the sequence number is assigned and every enqueue happens under one
 *   short lock, so all subscribers see events in sequence order
 */

use crate::models::HubEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(Uuid);

impl fmt::Display for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned by `register`: the handle for later removal and the event stream.
pub struct Subscription {
    pub handle: SubscriberHandle,
    pub events: mpsc::Receiver<HubEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sequence: u64,
    pub delivered: usize,
}

pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberHandle, mpsc::Sender<HubEvent>>>,
    /// Last assigned sequence number, held for a whole fan-out.
    delivery: Mutex<u64>,
    buffer: usize,
    evicted: AtomicU64,
}

impl Broadcaster {
    /// `buffer` is how many undelivered events a subscriber may lag behind
    /// before it counts as too slow.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            delivery: Mutex::new(0),
            buffer: buffer.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let handle = SubscriberHandle(Uuid::new_v4());
        self.subscribers.lock().insert(handle, tx);
        info!(%handle, "subscriber registered");
        Subscription { handle, events: rx }
    }

    /// Idempotent. Returns whether the handle was still registered.
    pub fn unregister(&self, handle: SubscriberHandle) -> bool {
        let removed = self.subscribers.lock().remove(&handle).is_some();
        if removed {
            info!(%handle, "subscriber unregistered");
        }
        removed
    }

    #[cfg(test)]
    pub fn is_registered(&self, handle: SubscriberHandle) -> bool {
        self.subscribers.lock().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Notifies every registered subscriber that `source_id` changed.
    ///
    /// Delivery failures never surface here: the failing subscriber is
    /// evicted and the remaining ones still receive the event.
    pub fn broadcast(&self, source_id: &str, received_at: OffsetDateTime) -> BroadcastReport {
        let mut sequence = self.delivery.lock();
        *sequence += 1;
        let event = HubEvent::Snapshot {
            source_id: source_id.to_string(),
            sequence: *sequence,
            received_at,
        };

        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|handle, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%handle, "subscriber channel closed");
                self.evict(handle)
            }
            Err(TrySendError::Full(_)) => {
                debug!(%handle, buffer = self.buffer, "subscriber too slow");
                self.evict(handle)
            }
        });

        BroadcastReport { sequence: *sequence, delivered }
    }

    /// Always `false`, for use inside `retain`.
    fn evict(&self, handle: &SubscriberHandle) -> bool {
        self.evicted.fetch_add(1, Ordering::Relaxed);
        info!(%handle, "subscriber evicted");
        false
    }
}
