use anyhow::{Result, bail};
use async_trait::async_trait;
use pkg_constants::state::{HARD_LIMIT_PREFIX, QUOTA_LIMIT_PREFIX};
use pkg_types::quota::{HardLimit, QuotaLimit};
use pkg_types::validate::validate_name;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use crate::client::StateStore;
use crate::watch::WatchEvent;

/// Typed access to Quota Limits and Hard Limits.
///
/// Every call goes to the backing store; nothing is cached. Hard Limit updates
/// are conditional on `resource_version` so concurrent writers working from a
/// stale read fail instead of overwriting each other.
#[async_trait]
pub trait QuotaRegistry: Send + Sync {
    /// All Quota Limits across every namespace.
    async fn list_quota_limits(&self) -> Result<Vec<QuotaLimit>>;

    /// Hard Limits in one namespace.
    async fn list_hard_limits(&self, namespace: &str) -> Result<Vec<HardLimit>>;

    /// Create a Hard Limit. Fails if one with the same name exists.
    /// Returns the stored object with its assigned `resource_version`.
    async fn create_hard_limit(&self, namespace: &str, limit: &HardLimit) -> Result<HardLimit>;

    /// Replace a Hard Limit if its stored `resource_version` still matches.
    async fn update_hard_limit(&self, namespace: &str, limit: &HardLimit) -> Result<HardLimit>;

    async fn delete_hard_limit(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create or replace a Quota Limit. Used by the CLI, not by the controller.
    async fn put_quota_limit(&self, quota: &QuotaLimit) -> Result<()>;

    /// Remove a Quota Limit. Used by the CLI, not by the controller.
    async fn delete_quota_limit(&self, namespace: &str, name: &str) -> Result<()>;

    /// Live stream of every mutation made through this registry's store,
    /// with the sequence number it starts after.
    async fn subscribe(&self) -> (u64, broadcast::Receiver<WatchEvent>);

    /// Buffered mutations after `seq`; `None` once the buffer no longer
    /// reaches back that far.
    async fn events_since(&self, seq: u64) -> Option<Vec<WatchEvent>>;
}

pub fn quota_limit_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", QUOTA_LIMIT_PREFIX, namespace, name)
}

pub fn hard_limit_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", HARD_LIMIT_PREFIX, namespace, name)
}

/// Split a Quota Limit key back into `(namespace, name)`.
pub fn parse_quota_limit_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(QUOTA_LIMIT_PREFIX)?;
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}

/// [`QuotaRegistry`] over a [`StateStore`], records stored as JSON.
#[derive(Clone)]
pub struct StoreRegistry {
    store: StateStore,
    /// Serializes read-compare-write on Hard Limits.
    write_lock: Arc<Mutex<()>>,
}

impl StoreRegistry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn list_decoded<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let entries = self.store.list_prefix(prefix).await?;
        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice(&value) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping malformed record {}: {}", key, e),
            }
        }
        Ok(items)
    }

    async fn get_hard_limit(&self, key: &str) -> Result<Option<HardLimit>> {
        match self.store.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QuotaRegistry for StoreRegistry {
    async fn list_quota_limits(&self) -> Result<Vec<QuotaLimit>> {
        self.list_decoded(QUOTA_LIMIT_PREFIX).await
    }

    async fn list_hard_limits(&self, namespace: &str) -> Result<Vec<HardLimit>> {
        let prefix = format!("{}{}/", HARD_LIMIT_PREFIX, namespace);
        self.list_decoded(&prefix).await
    }

    async fn create_hard_limit(&self, namespace: &str, limit: &HardLimit) -> Result<HardLimit> {
        validate_name(&limit.name)?;
        let key = hard_limit_key(namespace, &limit.name);
        let _guard = self.write_lock.lock().await;
        if self.store.get(&key).await?.is_some() {
            bail!("hard limit {}/{} already exists", namespace, limit.name);
        }
        let stored = HardLimit {
            namespace: namespace.to_string(),
            resource_version: 1,
            ..limit.clone()
        };
        self.store.put(&key, &serde_json::to_vec(&stored)?).await?;
        Ok(stored)
    }

    async fn update_hard_limit(&self, namespace: &str, limit: &HardLimit) -> Result<HardLimit> {
        let key = hard_limit_key(namespace, &limit.name);
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.get_hard_limit(&key).await? else {
            bail!("hard limit {}/{} not found", namespace, limit.name);
        };
        if current.resource_version != limit.resource_version {
            bail!(
                "conflict updating hard limit {}/{}: resource version {} is stale (stored {})",
                namespace,
                limit.name,
                limit.resource_version,
                current.resource_version
            );
        }
        let stored = HardLimit {
            namespace: namespace.to_string(),
            resource_version: current.resource_version + 1,
            ..limit.clone()
        };
        self.store.put(&key, &serde_json::to_vec(&stored)?).await?;
        Ok(stored)
    }

    async fn delete_hard_limit(&self, namespace: &str, name: &str) -> Result<()> {
        let key = hard_limit_key(namespace, name);
        let _guard = self.write_lock.lock().await;
        if self.store.get(&key).await?.is_none() {
            bail!("hard limit {}/{} not found", namespace, name);
        }
        self.store.delete(&key).await
    }

    async fn put_quota_limit(&self, quota: &QuotaLimit) -> Result<()> {
        validate_name(&quota.namespace)?;
        validate_name(&quota.name)?;
        let key = quota_limit_key(&quota.namespace, &quota.name);
        self.store.put(&key, &serde_json::to_vec(quota)?).await
    }

    async fn delete_quota_limit(&self, namespace: &str, name: &str) -> Result<()> {
        let key = quota_limit_key(namespace, name);
        if self.store.get(&key).await?.is_none() {
            bail!("quota limit {}/{} not found", namespace, name);
        }
        self.store.delete(&key).await
    }

    async fn subscribe(&self) -> (u64, broadcast::Receiver<WatchEvent>) {
        self.store.event_log.subscribe().await
    }

    async fn events_since(&self, seq: u64) -> Option<Vec<WatchEvent>> {
        self.store.event_log.events_since(seq).await
    }
}
