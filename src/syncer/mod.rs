//! # Sync Orchestrator
//!
//! A single loop that turns cluster state into published snapshots and
//! written status. It wakes on a kick (something changed), a discovery update
//! or a leadership change, and runs at most one pass at a time.
//!
//! Nothing is published before the first discovery input arrives, and
//! nothing is published or written while this instance is not the leader.

pub mod queue;

pub use queue::AsyncQueue;

use crate::config::ControllerConfig;
use crate::discovery::DiscoveryInputs;
use crate::query::GatewayQueries;
use crate::reports::{build_gateway_status, build_route_status, ReportMap};
use crate::storage::{ClusterState, ObjectIndex, StatusWriter};
use crate::translator::GatewayTranslator;
use crate::xds::{gateway_cache_key, EnvoySnapshot, SnapshotCache, FALLBACK_KEY};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub gateways: usize,
    pub published: usize,
    pub stale_keys: usize,
    pub status_writes: usize,
}

pub struct XdsSyncer {
    state: Arc<dyn ClusterState>,
    status: Arc<dyn StatusWriter>,
    cache: Arc<SnapshotCache>,
    translator: GatewayTranslator,
    controller_name: String,
    xds_garbage_collection: bool,
    kicks: Arc<AsyncQueue<()>>,
    discovery: Arc<AsyncQueue<DiscoveryInputs>>,
    leadership: watch::Receiver<bool>,
}

impl XdsSyncer {
    pub fn new(
        state: Arc<dyn ClusterState>,
        status: Arc<dyn StatusWriter>,
        cache: Arc<SnapshotCache>,
        config: &ControllerConfig,
        leadership: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state,
            status,
            cache,
            translator: GatewayTranslator::new(config.proxy_bind_address.clone()),
            controller_name: config.controller_name.clone(),
            xds_garbage_collection: config.xds_garbage_collection,
            kicks: Arc::new(AsyncQueue::new()),
            discovery: Arc::new(AsyncQueue::new()),
            leadership,
        }
    }

    /// Queue that triggers a resync
    pub fn kick_queue(&self) -> Arc<AsyncQueue<()>> {
        self.kicks.clone()
    }

    /// Queue that delivers discovery results
    pub fn discovery_queue(&self) -> Arc<AsyncQueue<DiscoveryInputs>> {
        self.discovery.clone()
    }

    /// Run until `cancel` fires. A pass in progress always completes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            controller_name = %self.controller_name,
            xds_garbage_collection = self.xds_garbage_collection,
            "Starting xDS syncer"
        );

        let kicks = self.kicks.clone();
        let discovery = self.discovery.clone();
        let mut latest: Option<DiscoveryInputs> = None;
        let mut leadership_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = kicks.dequeue() => debug!("Resync requested"),
                inputs = discovery.dequeue() => {
                    debug!(clusters = inputs.clusters.len(), "Discovery inputs updated");
                    latest = Some(inputs);
                }
                changed = self.leadership.changed(), if leadership_open => {
                    if changed.is_err() {
                        leadership_open = false;
                        continue;
                    }
                    info!(leader = *self.leadership.borrow(), "Leadership changed");
                }
            }

            let Some(inputs) = latest.as_ref() else {
                debug!("Waiting for discovery warm-up");
                continue;
            };
            if !*self.leadership.borrow() {
                debug!("Not the leader, skipping pass");
                continue;
            }

            let summary = self.sync_pass(inputs).await;
            debug!(?summary, "Sync pass complete");
        }
        info!("xDS syncer stopped");
    }

    /// One full pass: translate, publish, reset stale keys, write status
    pub async fn sync_pass(&self, discovery: &DiscoveryInputs) -> SyncSummary {
        let index = match self.state.snapshot().await {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Failed to read cluster state, abandoning pass");
                return SyncSummary::default();
            }
        };

        let mut summary = SyncSummary::default();
        let queries = GatewayQueries::new(&index);
        let mut reports = ReportMap::new();
        let mut live_keys = BTreeSet::new();

        for gateway in index.gateways() {
            let key = gateway_cache_key(gateway);
            let translated = self.translator.translate_gateway(&queries, gateway, &mut reports);
            let mut snapshot = EnvoySnapshot::from_translation(translated, discovery);
            snapshot.make_consistent();
            if let Err(e) = snapshot.consistent() {
                error!(key = %key, error = %e, "Snapshot still inconsistent after repair");
                continue;
            }

            summary.gateways += 1;
            if self.publish(&key, snapshot) {
                summary.published += 1;
            }
            live_keys.insert(key);
        }

        summary.stale_keys = self.handle_stale_keys(&live_keys);
        summary.status_writes = self.write_status(&index, &reports).await;
        summary
    }

    /// Store `snapshot` unless the cache already holds an equal one
    fn publish(&self, key: &str, snapshot: EnvoySnapshot) -> bool {
        if self.cache.get_snapshot(key).is_some_and(|current| *current == snapshot) {
            debug!(key = %key, "Snapshot unchanged");
            return false;
        }
        info!(
            key = %key,
            listeners = snapshot.listeners.len(),
            routes = snapshot.routes.len(),
            clusters = snapshot.clusters.len(),
            "Publishing snapshot"
        );
        self.cache.set_snapshot(key, snapshot);
        true
    }

    /// Reset or clear every known key that no Gateway produced this pass
    fn handle_stale_keys(&self, live_keys: &BTreeSet<String>) -> usize {
        let mut known: BTreeSet<String> = BTreeSet::new();
        known.insert(FALLBACK_KEY.to_string());
        known.extend(self.cache.status_keys());
        known.extend(self.cache.snapshot_keys());

        let mut stale = 0;
        for key in known.difference(live_keys) {
            if self.xds_garbage_collection {
                if self.cache.get_snapshot(key).is_some() {
                    debug!(key = %key, "Clearing stale snapshot");
                    self.cache.clear_snapshot(key);
                    stale += 1;
                }
            } else if self.publish(key, EnvoySnapshot::empty()) {
                stale += 1;
            }
        }
        stale
    }

    async fn write_status(&self, index: &ObjectIndex, reports: &ReportMap) -> usize {
        let mut writes = 0;

        for (name, report) in reports.gateway_reports() {
            let Some(gateway) = index.gateway(name) else { continue };
            let status = build_gateway_status(gateway, report);
            if gateway.status.as_ref() == Some(&status) {
                continue;
            }
            match self.status.write_gateway_status(name, status).await {
                Ok(()) => writes += 1,
                Err(e) => warn!(gateway = %name, error = %e, "Failed to write Gateway status"),
            }
        }

        for (name, report) in reports.route_reports() {
            let Some(route) = index.http_route(name) else { continue };
            let status = build_route_status(route, report, &self.controller_name);
            if route.status.as_ref() == Some(&status) {
                continue;
            }
            match self.status.write_route_status(name, status).await {
                Ok(()) => writes += 1,
                Err(e) => warn!(route = %name, error = %e, "Failed to write HTTPRoute status"),
            }
        }

        writes
    }
}

/// Kick the syncer on every object change until `cancel` fires
pub async fn kick_on_change(
    mut changes: watch::Receiver<u64>,
    kicks: Arc<AsyncQueue<()>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Object store closed");
                    break;
                }
                kicks.enqueue(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BackendRef, Gateway, GatewaySpec, HttpRoute, HttpRouteRule, HttpRouteSpec, Listener,
        NamespacedName, ObjectMeta, ParentReference, ProtocolType,
    };
    use crate::storage::ManifestStore;
    use crate::xds::EMPTY_VERSION;
    use tracing_test::traced_test;

    async fn published(updates: &mut tokio::sync::broadcast::Receiver<String>, key: &str) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while updates.recv().await.ok().as_deref() != Some(key) {}
        })
        .await
        .unwrap();
    }

    fn gateway(name: &str) -> Gateway {
        Gateway {
            metadata: ObjectMeta::new("default", name),
            spec: GatewaySpec {
                gateway_class_name: "gwplane".into(),
                listeners: vec![Listener::new("http", 8080, ProtocolType::Http)],
            },
            status: None,
        }
    }

    fn route() -> HttpRoute {
        HttpRoute {
            metadata: ObjectMeta::new("default", "web"),
            spec: HttpRouteSpec {
                parent_refs: vec![ParentReference::gateway("gw")],
                hostnames: vec![],
                rules: vec![HttpRouteRule {
                    backend_refs: vec![BackendRef::service("missing", 80)],
                    ..Default::default()
                }],
            },
            status: None,
        }
    }

    fn syncer(store: Arc<ManifestStore>, cache: Arc<SnapshotCache>, gc: bool) -> XdsSyncer {
        let config = ControllerConfig { xds_garbage_collection: gc, ..Default::default() };
        let (_tx, rx) = watch::channel(true);
        XdsSyncer::new(store.clone(), store, cache, &config, rx)
    }

    #[tokio::test]
    async fn pass_publishes_gateway_and_writes_status() {
        let store = Arc::new(ManifestStore::default());
        store.update(|index| {
            index.insert_gateway(gateway("gw"));
            index.insert_http_route(route());
        });
        let cache = Arc::new(SnapshotCache::new());
        let syncer = syncer(store.clone(), cache.clone(), false);

        let summary = syncer.sync_pass(&DiscoveryInputs::default()).await;
        assert_eq!(summary.gateways, 1);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.status_writes, 2);

        let snapshot = cache.get_snapshot("default~gw").unwrap();
        assert_eq!(snapshot.listeners.len(), 1);
        assert!(snapshot.consistent().is_ok());
        assert_eq!(
            cache.get_snapshot(FALLBACK_KEY).unwrap().listeners.version(),
            EMPTY_VERSION
        );

        let status = store.route_status(&NamespacedName::new("default", "web")).unwrap();
        assert_eq!(status.parents.len(), 1);
        assert_eq!(status.parents[0].controller_name, crate::config::DEFAULT_CONTROLLER_NAME);

        let again = syncer.sync_pass(&DiscoveryInputs::default()).await;
        assert_eq!(again.published, 0);
        assert_eq!(again.status_writes, 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn equal_snapshot_is_not_republished() {
        let store = Arc::new(ManifestStore::default());
        store.update(|index| index.insert_gateway(gateway("gw")));
        let cache = Arc::new(SnapshotCache::new());
        let syncer = syncer(store, cache.clone(), false);
        let mut updates = cache.subscribe();

        syncer.sync_pass(&DiscoveryInputs::default()).await;
        let mut published = Vec::new();
        while let Ok(key) = updates.try_recv() {
            published.push(key);
        }
        assert_eq!(published.len(), 2);

        syncer.sync_pass(&DiscoveryInputs::default()).await;
        assert!(updates.try_recv().is_err());
        assert!(logs_contain("Snapshot unchanged"));
    }

    #[tokio::test]
    async fn stale_key_is_reset_without_gc() {
        let store = Arc::new(ManifestStore::default());
        let cache = Arc::new(SnapshotCache::new());
        cache.set_snapshot("default~gone", EnvoySnapshot::new(vec![], vec![], vec![], vec![]));
        cache.register_node("default~proxy");

        let summary = syncer(store, cache.clone(), false).sync_pass(&DiscoveryInputs::default()).await;
        assert_eq!(summary.stale_keys, 3);
        for key in ["default~gone", "default~proxy", FALLBACK_KEY] {
            assert_eq!(cache.get_snapshot(key).unwrap().clusters.version(), EMPTY_VERSION);
        }
    }

    #[tokio::test]
    async fn stale_key_is_cleared_with_gc() {
        let store = Arc::new(ManifestStore::default());
        let cache = Arc::new(SnapshotCache::new());
        cache.set_snapshot("default~gone", EnvoySnapshot::empty());

        syncer(store, cache.clone(), true).sync_pass(&DiscoveryInputs::default()).await;
        assert!(cache.get_snapshot("default~gone").is_none());
        assert!(cache.snapshot_keys().is_empty());
    }

    #[tokio::test]
    async fn object_change_without_new_discovery_triggers_pass() {
        let store = Arc::new(ManifestStore::default());
        store.update(|index| index.insert_gateway(gateway("gw")));
        let cache = Arc::new(SnapshotCache::new());
        let (_leader_tx, leader_rx) = watch::channel(true);
        let syncer = XdsSyncer::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            &ControllerConfig::default(),
            leader_rx,
        );
        let cancel = CancellationToken::new();
        let watcher =
            tokio::spawn(kick_on_change(store.subscribe(), syncer.kick_queue(), cancel.clone()));
        syncer.discovery_queue().enqueue(DiscoveryInputs::default());
        let mut updates = cache.subscribe();
        let handle = tokio::spawn(syncer.run(cancel.clone()));

        published(&mut updates, "default~gw").await;
        store.update(|index| index.insert_gateway(gateway("other")));
        published(&mut updates, "default~other").await;
        assert!(cache.get_snapshot("default~other").is_some());

        cancel.cancel();
        handle.await.unwrap();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn loop_waits_for_discovery_and_leadership() {
        let store = Arc::new(ManifestStore::default());
        store.update(|index| index.insert_gateway(gateway("gw")));
        let cache = Arc::new(SnapshotCache::new());
        let (leader_tx, leader_rx) = watch::channel(false);
        let syncer = XdsSyncer::new(
            store.clone(),
            store,
            cache.clone(),
            &ControllerConfig::default(),
            leader_rx,
        );
        let kicks = syncer.kick_queue();
        let discovery = syncer.discovery_queue();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(syncer.run(cancel.clone()));

        let mut updates = cache.subscribe();
        kicks.enqueue(());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(cache.snapshot_keys().is_empty());

        discovery.enqueue(DiscoveryInputs::default());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(cache.snapshot_keys().is_empty());

        leader_tx.send(true).unwrap();
        let key = tokio::time::timeout(std::time::Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(key == "default~gw" || key == FALLBACK_KEY);

        cancel.cancel();
        handle.await.unwrap();
    }
}
