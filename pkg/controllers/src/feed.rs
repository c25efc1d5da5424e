use pkg_state::registry::{QuotaRegistry, parse_quota_limit_key};
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::quota::QuotaLimit;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// A Quota Limit notification, resolved from a raw watch event.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaEvent {
    Added(QuotaLimit),
    Removed(RemovedQuota),
}

/// What is known about a Quota Limit that has gone away.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovedQuota {
    /// The last stored version of the object.
    Snapshot(QuotaLimit),
    /// Only the identity survived (no value was recorded or it did not decode).
    Tombstone { namespace: String, name: String },
}

impl RemovedQuota {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Snapshot(quota) => &quota.namespace,
            Self::Tombstone { namespace, .. } => namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Snapshot(quota) => &quota.name,
            Self::Tombstone { name, .. } => name,
        }
    }
}

/// Resolve a raw watch event into a [`QuotaEvent`].
/// Events for other kinds and undecodable payloads yield `None`.
pub fn decode(event: &WatchEvent) -> Option<QuotaEvent> {
    let (namespace, name) = parse_quota_limit_key(&event.key)?;
    let snapshot = event
        .value
        .as_deref()
        .and_then(|v| serde_json::from_slice::<QuotaLimit>(v).ok())
        .filter(|q| q.namespace == namespace && q.name == name);

    match event.event_type {
        EventType::Put => match snapshot {
            Some(quota) => Some(QuotaEvent::Added(quota)),
            None => {
                debug!("Dropping undecodable quota limit event for {}", event.key);
                None
            }
        },
        EventType::Delete => Some(QuotaEvent::Removed(match snapshot {
            Some(quota) => RemovedQuota::Snapshot(quota),
            None => RemovedQuota::Tombstone {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        })),
    }
}

/// Subscription delivering only Quota Limit notifications.
///
/// Starts by replaying every existing Quota Limit as `Added`, then follows
/// live mutations. Delivery is at-least-once: a write can show up both in
/// the replay and in the live stream. If the live stream overflows, missed
/// events are recovered from the event log's buffer; if the buffer has moved
/// on too, all Quota Limits are listed again.
pub struct ChangeFeed {
    registry: Arc<dyn QuotaRegistry>,
    replay: VecDeque<QuotaEvent>,
    rx: broadcast::Receiver<WatchEvent>,
    /// Highest event sequence already turned into notifications.
    last_seq: u64,
}

impl ChangeFeed {
    pub async fn start(registry: Arc<dyn QuotaRegistry>) -> anyhow::Result<Self> {
        // Subscribe before listing so nothing written in between is lost.
        let (last_seq, rx) = registry.subscribe().await;
        let replay = list_as_added(registry.as_ref()).await?;
        Ok(Self {
            registry,
            replay,
            rx,
            last_seq,
        })
    }

    /// Next notification, or `None` once the underlying stream has closed.
    pub async fn next(&mut self) -> Option<QuotaEvent> {
        loop {
            if let Some(event) = self.replay.pop_front() {
                return Some(event);
            }
            match self.rx.recv().await {
                Ok(event) => {
                    // Already delivered by a catch-up replay.
                    if event.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = event.seq;
                    if let Some(quota_event) = decode(&event) {
                        return Some(quota_event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        "Change feed lagged by {} events after seq {}, catching up",
                        missed, self.last_seq
                    );
                    self.catch_up().await;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn catch_up(&mut self) {
        if let Some(events) = self.registry.events_since(self.last_seq).await {
            for event in events {
                self.last_seq = event.seq;
                self.replay.extend(decode(&event));
            }
            return;
        }

        warn!(
            "Change feed fell behind the event log after seq {}; relisting quota limits, \
             hard limits of quota limits removed in the gap will not be deleted",
            self.last_seq
        );
        let (seq, rx) = self.registry.subscribe().await;
        self.rx = rx;
        self.last_seq = seq;
        match list_as_added(self.registry.as_ref()).await {
            Ok(added) => self.replay.extend(added),
            Err(e) => warn!("Change feed failed to relist quota limits: {}", e),
        }
    }
}

async fn list_as_added(registry: &dyn QuotaRegistry) -> anyhow::Result<VecDeque<QuotaEvent>> {
    Ok(registry
        .list_quota_limits()
        .await?
        .into_iter()
        .map(QuotaEvent::Added)
        .collect())
}
