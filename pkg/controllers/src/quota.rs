use pkg_constants::quota::DEFAULT_RESYNC_PERIOD_MS;
use pkg_state::registry::QuotaRegistry;
use pkg_types::quota::{HardLimit, QuotaLimit};
use pkg_types::validate::validate_hard_limit_name;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::feed::{ChangeFeed, QuotaEvent, RemovedQuota};
use crate::reconcile::{Action, reconcile_one};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Period of the drift-correction pass.
    pub resync_period: Duration,
    /// Also create missing Hard Limits during resync. Off by default: creation
    /// normally belongs to the add path only, so a failed create is never retried.
    pub ensure_hard_limits: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_millis(DEFAULT_RESYNC_PERIOD_MS),
            ensure_hard_limits: false,
        }
    }
}

/// Tally of one drift-correction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub updated: usize,
    pub unchanged: usize,
    pub created: usize,
    /// Namespaces with no Hard Limit, left to the add path.
    pub missing: usize,
    /// Namespaces with several Hard Limits.
    pub skipped: usize,
    pub failed: usize,
}

impl DriftReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Created => self.created += 1,
            Outcome::Missing => self.missing += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    fn wrote(&self) -> bool {
        self.updated > 0 || self.created > 0
    }
}

enum Outcome {
    Updated,
    Unchanged,
    Created,
    Missing,
    Skipped,
}

/// Keeps each namespace's Hard Limit in line with its Quota Limit.
///
/// Two contexts drive it concurrently: the change feed (add/remove
/// notifications, handled one at a time) and a resync timer that re-derives
/// every Hard Limit from current allocations. They share no lock; stale
/// writes are rejected by the registry's versioned updates and picked up
/// again on the next resync.
pub struct QuotaController {
    registry: Arc<dyn QuotaRegistry>,
    config: ManagerConfig,
}

impl QuotaController {
    pub fn new(registry: Arc<dyn QuotaRegistry>, config: ManagerConfig) -> Self {
        Self { registry, config }
    }

    /// Start the change-feed and resync loops as background tasks.
    /// The returned handle completes once both have observed `shutdown`.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::new(self);
        tokio::spawn(async move {
            info!(
                "QuotaController started (resync={}ms, ensure_hard_limits={})",
                controller.config.resync_period.as_millis(),
                controller.config.ensure_hard_limits
            );
            let feed = tokio::spawn({
                let controller = controller.clone();
                let shutdown = shutdown.clone();
                async move { controller.run_feed(shutdown).await }
            });
            let resync = tokio::spawn({
                let controller = controller.clone();
                async move { controller.run_resync(shutdown).await }
            });
            let (feed, resync) = tokio::join!(feed, resync);
            if let Err(e) = feed {
                warn!("QuotaController change feed task failed: {}", e);
            }
            if let Err(e) = resync {
                warn!("QuotaController resync task failed: {}", e);
            }
            info!("QuotaController stopped");
        })
    }

    async fn run_feed(&self, mut shutdown: watch::Receiver<bool>) {
        let mut feed = loop {
            tokio::select! {
                _ = shutdown_signal(&mut shutdown) => return,
                started = ChangeFeed::start(self.registry.clone()) => match started {
                    Ok(feed) => break feed,
                    Err(e) => {
                        warn!("QuotaController failed to start change feed: {}", e);
                        tokio::select! {
                            _ = shutdown_signal(&mut shutdown) => return,
                            _ = tokio::time::sleep(self.config.resync_period) => {}
                        }
                    }
                },
            }
        };

        loop {
            tokio::select! {
                _ = shutdown_signal(&mut shutdown) => return,
                event = feed.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("QuotaController change feed closed");
                        return;
                    }
                },
            }
        }
    }

    async fn run_resync(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.resync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_signal(&mut shutdown) => return,
                _ = interval.tick() => match self.run_once().await {
                    Ok(report) if report.wrote() || report.failed > 0 => {
                        info!("QuotaController resync: {:?}", report)
                    }
                    Ok(report) => debug!("QuotaController resync: {:?}", report),
                    Err(e) => warn!("QuotaController failed to list quota limits: {}", e),
                },
            }
        }
    }

    pub async fn handle_event(&self, event: QuotaEvent) {
        match event {
            QuotaEvent::Added(quota) => self.on_quota_added(&quota).await,
            QuotaEvent::Removed(removed) => self.on_quota_removed(&removed).await,
        }
    }

    /// Create the default Hard Limit if the namespace has none.
    pub async fn on_quota_added(&self, quota: &QuotaLimit) {
        debug!("QuotaLimit added: {}/{}", quota.namespace, quota.name);
        let existing = match self.registry.list_hard_limits(&quota.namespace).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    "Failed to list hard limits in {} for quota limit {}: {}",
                    quota.namespace, quota.name, e
                );
                return;
            }
        };

        match reconcile_one(quota, &existing) {
            Action::Create(limit) => {
                if let Err(e) = self.create_hard_limit(quota, limit).await {
                    warn!("QuotaLimit {}/{}: {}", quota.namespace, quota.name, e);
                }
            }
            Action::Update(_) => debug!(
                "QuotaLimit {}/{}: hard limit already present",
                quota.namespace, quota.name
            ),
            Action::Skip { existing } => warn!(
                "QuotaLimit {}/{}: {} hard limits in namespace, leaving them alone",
                quota.namespace, quota.name, existing
            ),
        }
    }

    /// Delete the namespace's Hard Limit if there is exactly one.
    pub async fn on_quota_removed(&self, removed: &RemovedQuota) {
        let (namespace, name) = (removed.namespace(), removed.name());
        debug!("QuotaLimit removed: {}/{}", namespace, name);
        let existing = match self.registry.list_hard_limits(namespace).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    "Failed to list hard limits in {} for removed quota limit {}: {}",
                    namespace, name, e
                );
                return;
            }
        };

        match existing.as_slice() {
            [] => debug!(
                "QuotaLimit {}/{}: no hard limit to delete",
                namespace, name
            ),
            [only] => match self.registry.delete_hard_limit(namespace, &only.name).await {
                Ok(()) => info!(
                    "Deleted hard limit {}/{} for quota limit {}",
                    namespace, only.name, name
                ),
                Err(e) => warn!(
                    "Failed to delete hard limit {}/{}: {}",
                    namespace, only.name, e
                ),
            },
            many => warn!(
                "QuotaLimit {}/{}: {} hard limits in namespace, not deleting any",
                namespace,
                name,
                many.len()
            ),
        }
    }

    /// One drift-correction pass over every Quota Limit.
    ///
    /// Fails only if the Quota Limits cannot be listed; per-namespace errors
    /// are logged, counted and do not stop the pass.
    pub async fn run_once(&self) -> anyhow::Result<DriftReport> {
        let quotas = self.registry.list_quota_limits().await?;
        let mut report = DriftReport::default();
        for quota in &quotas {
            match self.resync_quota(quota).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "Failed to resync quota limit {}/{}: {}",
                        quota.namespace, quota.name, e
                    );
                }
            }
        }
        Ok(report)
    }

    async fn resync_quota(&self, quota: &QuotaLimit) -> anyhow::Result<Outcome> {
        let existing = self.registry.list_hard_limits(&quota.namespace).await?;
        match reconcile_one(quota, &existing) {
            Action::Update(desired) => {
                if existing.first() == Some(&desired) {
                    return Ok(Outcome::Unchanged);
                }
                self.registry
                    .update_hard_limit(&quota.namespace, &desired)
                    .await?;
                debug!(
                    "Updated hard limit {}/{} from quota limit {}",
                    quota.namespace, desired.name, quota.name
                );
                Ok(Outcome::Updated)
            }
            Action::Create(limit) if self.config.ensure_hard_limits => {
                self.create_hard_limit(quota, limit).await?;
                Ok(Outcome::Created)
            }
            Action::Create(_) => {
                debug!(
                    "QuotaLimit {}/{}: no hard limit in namespace, not creating during resync",
                    quota.namespace, quota.name
                );
                Ok(Outcome::Missing)
            }
            Action::Skip { existing } => {
                warn!(
                    "QuotaLimit {}/{}: {} hard limits in namespace, skipping update",
                    quota.namespace, quota.name, existing
                );
                Ok(Outcome::Skipped)
            }
        }
    }

    /// Create `limit` for `quota`. Failures are returned for the caller to
    /// log; the add path and resync report them differently.
    async fn create_hard_limit(
        &self,
        quota: &QuotaLimit,
        limit: HardLimit,
    ) -> anyhow::Result<HardLimit> {
        validate_hard_limit_name(&quota.name)
            .map_err(|e| anyhow::anyhow!("cannot derive a valid hard limit name: {}", e))?;
        let created = self
            .registry
            .create_hard_limit(&quota.namespace, &limit)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create hard limit {}: {}", limit.name, e))?;
        info!(
            "Created hard limit {}/{} for quota limit {}",
            created.namespace, created.name, quota.name
        );
        Ok(created)
    }
}

/// Resolves once `shutdown` holds `true`, or its sender is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pkg_state::client::StateStore;
    use pkg_state::registry::{StoreRegistry, hard_limit_key};
    use pkg_state::watch::WatchEvent;
    use pkg_types::quantity::Quantity;
    use std::collections::HashSet;
    use tokio::sync::broadcast;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn setup(config: ManagerConfig) -> (StoreRegistry, QuotaController) {
        let registry = StoreRegistry::new(StateStore::in_memory());
        let controller = QuotaController::new(Arc::new(registry.clone()), config);
        (registry, controller)
    }

    async fn raw_hard_limit(registry: &StoreRegistry, ns: &str, name: &str) -> Option<Vec<u8>> {
        registry
            .store()
            .get(&hard_limit_key(ns, name))
            .await
            .unwrap()
    }

    /// Two Hard Limits in `ns`, returning their raw stored bytes.
    async fn seed_ambiguous(registry: &StoreRegistry, ns: &str) -> Vec<Vec<u8>> {
        let mut raw = Vec::new();
        for name in ["a", "b"] {
            let limit = HardLimit::for_quota_limit(&QuotaLimit::new(ns, name));
            registry.create_hard_limit(ns, &limit).await.unwrap();
            raw.push(raw_hard_limit(registry, ns, &limit.name).await.unwrap());
        }
        raw
    }

    /// Wraps a registry and fails selected calls.
    struct FlakyRegistry {
        inner: StoreRegistry,
        fail_list_quotas: bool,
        fail_list_in: HashSet<String>,
        fail_updates_in: HashSet<String>,
    }

    impl FlakyRegistry {
        fn new(inner: StoreRegistry) -> Self {
            Self {
                inner,
                fail_list_quotas: false,
                fail_list_in: HashSet::new(),
                fail_updates_in: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl QuotaRegistry for FlakyRegistry {
        async fn list_quota_limits(&self) -> anyhow::Result<Vec<QuotaLimit>> {
            if self.fail_list_quotas {
                anyhow::bail!("connection refused");
            }
            self.inner.list_quota_limits().await
        }

        async fn list_hard_limits(&self, namespace: &str) -> anyhow::Result<Vec<HardLimit>> {
            if self.fail_list_in.contains(namespace) {
                anyhow::bail!("connection reset listing {}", namespace);
            }
            self.inner.list_hard_limits(namespace).await
        }

        async fn create_hard_limit(
            &self,
            namespace: &str,
            limit: &HardLimit,
        ) -> anyhow::Result<HardLimit> {
            self.inner.create_hard_limit(namespace, limit).await
        }

        async fn update_hard_limit(
            &self,
            namespace: &str,
            limit: &HardLimit,
        ) -> anyhow::Result<HardLimit> {
            if self.fail_updates_in.contains(namespace) {
                anyhow::bail!("timeout updating {}", limit.name);
            }
            self.inner.update_hard_limit(namespace, limit).await
        }

        async fn delete_hard_limit(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
            self.inner.delete_hard_limit(namespace, name).await
        }

        async fn put_quota_limit(&self, quota: &QuotaLimit) -> anyhow::Result<()> {
            self.inner.put_quota_limit(quota).await
        }

        async fn delete_quota_limit(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
            self.inner.delete_quota_limit(namespace, name).await
        }

        async fn subscribe(&self) -> (u64, broadcast::Receiver<WatchEvent>) {
            self.inner.subscribe().await
        }

        async fn events_since(&self, seq: u64) -> Option<Vec<WatchEvent>> {
            self.inner.events_since(seq).await
        }
    }

    #[tokio::test]
    async fn test_add_creates_zeroed_default() {
        let (registry, controller) = setup(ManagerConfig::default());
        let quota = QuotaLimit::new("ns1", "q1");

        controller.on_quota_added(&quota).await;

        let limits = registry.list_hard_limits("ns1").await.unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].name, "quota-q1");
        for key in ["limits.cpu", "requests.cpu", "limits.memory", "requests.memory"] {
            assert!(limits[0].hard[key].is_zero(), "{} should be zero", key);
        }
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (registry, controller) = setup(ManagerConfig::default());
        let quota = QuotaLimit::new("ns1", "q1");

        controller.on_quota_added(&quota).await;
        let first = raw_hard_limit(&registry, "ns1", "quota-q1").await;
        controller.on_quota_added(&quota).await;

        assert_eq!(registry.list_hard_limits("ns1").await.unwrap().len(), 1);
        assert_eq!(raw_hard_limit(&registry, "ns1", "quota-q1").await, first);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (registry, controller) = setup(ManagerConfig::default());
        let quota = QuotaLimit::new("ns1", "q1");
        controller.on_quota_added(&quota).await;

        let removed = RemovedQuota::Snapshot(quota);
        controller.on_quota_removed(&removed).await;
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());

        controller.on_quota_removed(&removed).await;
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_from_tombstone() {
        let (registry, controller) = setup(ManagerConfig::default());
        controller
            .on_quota_added(&QuotaLimit::new("ns1", "q1"))
            .await;

        controller
            .on_quota_removed(&RemovedQuota::Tombstone {
                namespace: "ns1".into(),
                name: "q1".into(),
            })
            .await;
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_converges_and_keeps_unrelated_keys() {
        let (registry, controller) = setup(ManagerConfig::default());
        let mut quota = QuotaLimit::new("ns1", "q1");
        controller.on_quota_added(&quota).await;

        let mut existing = registry.list_hard_limits("ns1").await.unwrap().remove(0);
        existing.hard.insert("limits.storage".into(), q("100Gi"));
        registry.update_hard_limit("ns1", &existing).await.unwrap();

        quota.allocated.insert("cpu".into(), q("4"));
        quota.allocated.insert("memory".into(), q("8Gi"));
        registry.put_quota_limit(&quota).await.unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.updated, 1);

        let hard = &registry.list_hard_limits("ns1").await.unwrap()[0].hard;
        assert_eq!(hard["limits.cpu"], q("4"));
        assert_eq!(hard["requests.cpu"], q("4"));
        assert_eq!(hard["limits.memory"], q("8Gi"));
        assert_eq!(hard["requests.memory"], q("8Gi"));
        assert_eq!(hard["limits.storage"], q("100Gi"));

        // A second pass has nothing left to write.
        let report = controller.run_once().await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_ambiguous_namespace_is_never_touched() {
        let (registry, controller) = setup(ManagerConfig {
            ensure_hard_limits: true,
            ..ManagerConfig::default()
        });
        let before = seed_ambiguous(&registry, "ns1").await;

        let mut quota = QuotaLimit::new("ns1", "q1");
        quota.allocated.insert("cpu".into(), q("2"));
        registry.put_quota_limit(&quota).await.unwrap();

        controller.on_quota_added(&quota).await;
        let report = controller.run_once().await.unwrap();
        assert_eq!(report.skipped, 1);
        controller
            .on_quota_removed(&RemovedQuota::Snapshot(quota))
            .await;

        let after = vec![
            raw_hard_limit(&registry, "ns1", "quota-a").await.unwrap(),
            raw_hard_limit(&registry, "ns1", "quota-b").await.unwrap(),
        ];
        assert_eq!(before, after);
        assert_eq!(registry.list_hard_limits("ns1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resync_does_not_create_by_default() {
        let (registry, controller) = setup(ManagerConfig::default());
        registry
            .put_quota_limit(&QuotaLimit::new("ns1", "q1"))
            .await
            .unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.missing, 1);
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_creates_when_ensuring() {
        let (registry, controller) = setup(ManagerConfig {
            ensure_hard_limits: true,
            ..ManagerConfig::default()
        });
        registry
            .put_quota_limit(&QuotaLimit::new("ns1", "q1"))
            .await
            .unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.created, 1);
        let limits = registry.list_hard_limits("ns1").await.unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].name, "quota-q1");
    }

    #[tokio::test]
    async fn test_list_failure_aborts_the_pass() {
        let inner = StoreRegistry::new(StateStore::in_memory());
        inner
            .put_quota_limit(&QuotaLimit::new("ns1", "q1"))
            .await
            .unwrap();
        let mut flaky = FlakyRegistry::new(inner);
        flaky.fail_list_quotas = true;
        let controller = QuotaController::new(Arc::new(flaky), ManagerConfig::default());

        assert!(controller.run_once().await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_failures_are_isolated() {
        let inner = StoreRegistry::new(StateStore::in_memory());
        for ns in ["ns1", "ns2", "ns3"] {
            let mut quota = QuotaLimit::new(ns, "q1");
            inner.put_quota_limit(&quota).await.unwrap();
            inner
                .create_hard_limit(ns, &HardLimit::for_quota_limit(&quota))
                .await
                .unwrap();
            quota.allocated.insert("cpu".into(), q("3"));
            inner.put_quota_limit(&quota).await.unwrap();
        }
        let mut flaky = FlakyRegistry::new(inner.clone());
        flaky.fail_list_in.insert("ns1".into());
        flaky.fail_updates_in.insert("ns2".into());
        let controller = QuotaController::new(Arc::new(flaky), ManagerConfig::default());

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.updated, 1);

        let ns3 = &inner.list_hard_limits("ns3").await.unwrap()[0];
        assert_eq!(ns3.hard["limits.cpu"], q("3"));
        let ns2 = &inner.list_hard_limits("ns2").await.unwrap()[0];
        assert!(ns2.hard["limits.cpu"].is_zero());
    }

    #[tokio::test]
    async fn test_handlers_do_nothing_when_listing_fails() {
        let inner = StoreRegistry::new(StateStore::in_memory());
        // ns1 has one Hard Limit, ns2 has none; both listings fail.
        let q1 = QuotaLimit::new("ns1", "q1");
        inner
            .create_hard_limit("ns1", &HardLimit::for_quota_limit(&q1))
            .await
            .unwrap();
        let mut flaky = FlakyRegistry::new(inner.clone());
        flaky.fail_list_in.insert("ns1".into());
        flaky.fail_list_in.insert("ns2".into());
        let controller = QuotaController::new(Arc::new(flaky), ManagerConfig::default());

        controller
            .on_quota_removed(&RemovedQuota::Snapshot(q1))
            .await;
        controller
            .on_quota_added(&QuotaLimit::new("ns2", "q2"))
            .await;

        assert_eq!(inner.list_hard_limits("ns1").await.unwrap().len(), 1);
        assert!(inner.list_hard_limits("ns2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_counts_failed_create_once() {
        let (registry, controller) = setup(ManagerConfig {
            ensure_hard_limits: true,
            ..ManagerConfig::default()
        });
        registry
            .put_quota_limit(&QuotaLimit::new("ns1", &"q".repeat(60)))
            .await
            .unwrap();

        let report = controller.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 0);
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_derived_name_is_not_created() {
        let (registry, controller) = setup(ManagerConfig::default());
        let quota = QuotaLimit::new("ns1", &"q".repeat(60));

        controller.on_quota_added(&quota).await;
        assert!(registry.list_hard_limits("ns1").await.unwrap().is_empty());
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_to_end_lifecycle() {
        let (registry, controller) = setup(ManagerConfig {
            resync_period: Duration::from_millis(20),
            ensure_hard_limits: false,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = controller.start(shutdown_rx);
        let reg = &registry;

        // q1 appears with no allocation: the add path creates an all-zero limit.
        let mut quota = QuotaLimit::new("ns1", "q1");
        registry.put_quota_limit(&quota).await.unwrap();
        wait_until(move || async move {
            reg.list_hard_limits("ns1").await.unwrap().len() == 1
        })
        .await;
        let created = &registry.list_hard_limits("ns1").await.unwrap()[0];
        assert_eq!(created.name, "quota-q1");
        assert!(created.hard.values().all(Quantity::is_zero));

        // cpu allocation shows up: resync copies it, memory stays zero.
        quota.allocated.insert("cpu".into(), q("2"));
        registry.put_quota_limit(&quota).await.unwrap();
        wait_until(move || async move {
            let limits = reg.list_hard_limits("ns1").await.unwrap();
            limits.len() == 1 && limits[0].hard["limits.cpu"] == q("2")
        })
        .await;
        let updated = &registry.list_hard_limits("ns1").await.unwrap()[0];
        assert_eq!(updated.hard["requests.cpu"], q("2"));
        assert!(updated.hard["limits.memory"].is_zero());
        assert!(updated.hard["requests.memory"].is_zero());

        // q1 goes away: the remove path deletes its limit.
        registry.delete_quota_limit("ns1", "q1").await.unwrap();
        wait_until(move || async move {
            reg.list_hard_limits("ns1").await.unwrap().is_empty()
        })
        .await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("controller did not stop")
            .unwrap();
    }
}
