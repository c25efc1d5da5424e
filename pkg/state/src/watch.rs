use pkg_constants::state::EVENT_BROADCAST_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
///
/// For `Put` the value is the newly written record; for `Delete` it is the
/// last stored record (absent if the key did not exist).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// In-memory event log that tracks all state mutations with monotonic sequence numbers.
/// Clients can subscribe to receive events as they are emitted.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: VecDeque<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given capacity for recent events.
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY.min(max_events).max(1));
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called internally by StateStore on put/delete.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key,
            value,
        };
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // Sent under the lock so subscribers observe sequence order.
        let _ = self.sender.send(event);
    }

    /// Subscribe to new events. Returns the sequence number at subscription
    /// time: every event with a higher `seq` arrives on the receiver.
    pub async fn subscribe(&self) -> (u64, broadcast::Receiver<WatchEvent>) {
        // emit() sends while holding the write lock, so nothing can slip in
        // between reading `seq` and subscribing.
        let inner = self.inner.read().await;
        (inner.seq, self.sender.subscribe())
    }

    /// All events after `from_seq`, or `None` if some of them have already
    /// been evicted from the ring buffer.
    pub async fn events_since(&self, from_seq: u64) -> Option<Vec<WatchEvent>> {
        let inner = self.inner.read().await;
        let evicted_up_to = inner.seq - inner.events.len() as u64;
        if from_seq < evicted_up_to {
            return None;
        }
        Some(
            inner
                .events
                .iter()
                .filter(|e| e.seq > from_seq)
                .cloned()
                .collect(),
        )
    }
}
