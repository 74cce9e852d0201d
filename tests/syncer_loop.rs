//! Integration tests for the discovery pipeline and syncer loop
//!
//! These run the long-lived tasks the way the binary does and observe the
//! snapshot cache from outside.

use std::sync::Arc;
use std::time::Duration;

use gwplane::config::{ControllerConfig, XdsConfig};
use gwplane::discovery::run_discovery;
use gwplane::storage::ManifestStore;
use gwplane::syncer::XdsSyncer;
use gwplane::xds::{SnapshotCache, FALLBACK_KEY};
use gwplane::{Config, Server};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const MANIFESTS: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: edge
  namespace: default
spec:
  gatewayClassName: gwplane
  listeners:
  - name: http
    port: 8080
    protocol: HTTP
---
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: web
  namespace: default
spec:
  parentRefs:
  - name: edge
  rules:
  - backendRefs:
    - name: app
      port: 80
---
apiVersion: v1
kind: Service
metadata:
  name: app
  namespace: default
spec:
  ports:
  - port: 80
"#;

const ENDPOINTS: &str = r#"
apiVersion: v1
kind: Endpoints
metadata:
  name: app
  namespace: default
subsets:
- addresses:
  - ip: 10.0.0.7
  ports:
  - port: 8080
"#;

/// Wait until `key` is published
async fn published(updates: &mut broadcast::Receiver<String>, key: &str) {
    timeout(Duration::from_secs(5), async {
        loop {
            match updates.recv().await {
                Ok(k) if k == key => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("cache closed"),
            }
        }
    })
    .await
    .expect("snapshot published in time");
}

#[tokio::test]
async fn store_changes_flow_through_to_snapshots() {
    let store = Arc::new(ManifestStore::default());
    store.apply_yaml(MANIFESTS).unwrap();
    let cache = Arc::new(SnapshotCache::new());
    let mut updates = cache.subscribe();

    let (_leader_tx, leadership) = watch::channel(true);
    let syncer = XdsSyncer::new(
        store.clone(),
        store.clone(),
        cache.clone(),
        &ControllerConfig::default(),
        leadership,
    );
    let cancel = CancellationToken::new();
    let discovery = tokio::spawn(run_discovery(
        store.clone(),
        store.subscribe(),
        syncer.discovery_queue(),
        cancel.clone(),
    ));
    let sync = tokio::spawn(syncer.run(cancel.clone()));

    published(&mut updates, "default~edge").await;
    let first = cache.get_snapshot("default~edge").unwrap();
    assert_eq!(first.clusters.len(), 1);
    let cla = first.endpoints.get("kube_default_app_80").unwrap();
    assert!(cla.endpoints.is_empty());
    assert!(cache.get_snapshot(FALLBACK_KEY).is_some());

    store.apply_yaml(ENDPOINTS).unwrap();
    published(&mut updates, "default~edge").await;
    let second = cache.get_snapshot("default~edge").unwrap();
    assert_ne!(second.endpoints.version(), first.endpoints.version());
    assert_eq!(second.listeners.version(), first.listeners.version());
    assert_eq!(second.endpoints.get("kube_default_app_80").unwrap().endpoints.len(), 1);

    cancel.cancel();
    discovery.await.unwrap();
    sync.await.unwrap();
}

#[tokio::test]
async fn follower_publishes_nothing_until_elected() {
    let store = Arc::new(ManifestStore::default());
    store.apply_yaml(MANIFESTS).unwrap();
    let cache = Arc::new(SnapshotCache::new());
    let mut updates = cache.subscribe();

    let (leader_tx, leadership) = watch::channel(false);
    let syncer = XdsSyncer::new(
        store.clone(),
        store.clone(),
        cache.clone(),
        &ControllerConfig::default(),
        leadership,
    );
    let cancel = CancellationToken::new();
    tokio::spawn(run_discovery(
        store.clone(),
        store.subscribe(),
        syncer.discovery_queue(),
        cancel.clone(),
    ));
    let sync = tokio::spawn(syncer.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.snapshot_keys().is_empty());
    assert!(store.gateway_status(&gwplane::domain::NamespacedName::new("default", "edge")).is_none());

    leader_tx.send(true).unwrap();
    published(&mut updates, "default~edge").await;

    cancel.cancel();
    sync.await.unwrap();
}

#[tokio::test]
async fn server_runs_until_shutdown() {
    let store = ManifestStore::default();
    store.apply_yaml(MANIFESTS).unwrap();

    let config = Config {
        xds: XdsConfig { bind_address: "127.0.0.1".into(), port: 0 },
        ..Default::default()
    };
    let server = Server::new(config, store);
    let cache = server.cache();
    let store = server.store();
    let mut updates = cache.subscribe();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    published(&mut updates, "default~edge").await;
    assert!(cache.get_snapshot("default~edge").unwrap().consistent().is_ok());

    // Services are unchanged, so only the object watch can trigger this pass.
    store.apply_yaml(&MANIFESTS.replace("name: edge", "name: internal")).unwrap();
    published(&mut updates, "default~internal").await;

    shutdown.cancel();
    let result = timeout(Duration::from_secs(5), handle).await.expect("server stops in time");
    assert!(result.unwrap().is_ok());
}
