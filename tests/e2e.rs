//! End-to-end translation tests
//!
//! Manifests are loaded from disk into the file-backed store, a sync pass
//! runs against them, and the published snapshot and written statuses are
//! checked together.

use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{address, socket_address::PortSpecifier};
use envoy_types::pb::envoy::config::endpoint::v3::lb_endpoint::HostIdentifier;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, RouteAction,
};
use gwplane::config::ControllerConfig;
use gwplane::discovery::DiscoveryInputs;
use gwplane::domain::condition::{find_condition, reasons, types};
use gwplane::domain::{ConditionStatus, NamespacedName};
use gwplane::storage::ManifestStore;
use gwplane::syncer::XdsSyncer;
use gwplane::xds::{SnapshotCache, EMPTY_VERSION};
use tokio::sync::watch;

const GATEWAY: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: edge
  namespace: infra
spec:
  gatewayClassName: gwplane
  listeners:
  - name: http
    port: 80
    protocol: HTTP
    allowedRoutes:
      namespaces:
        from: All
"#;

const ROUTE: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: web
  namespace: apps
  generation: 3
spec:
  parentRefs:
  - name: edge
    namespace: infra
  hostnames:
  - app.example.com
  rules:
  - matches:
    - path:
        type: PathPrefix
        value: /api
    backendRefs:
    - name: app
      namespace: backend
      port: 80
"#;

const BACKEND: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: app
  namespace: backend
spec:
  ports:
  - name: http
    port: 80
---
apiVersion: v1
kind: Endpoints
metadata:
  name: app
  namespace: backend
subsets:
- addresses:
  - ip: 10.1.0.5
  - ip: 10.1.0.6
  ports:
  - name: http
    port: 8080
"#;

const GRANT: &str = r#"
apiVersion: gateway.networking.k8s.io/v1beta1
kind: ReferenceGrant
metadata:
  name: apps-to-backend
  namespace: backend
spec:
  from:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    namespace: apps
  to:
  - group: ""
    kind: Service
"#;

fn load(files: &[(&str, &str)]) -> Arc<ManifestStore> {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    Arc::new(ManifestStore::load_dir(dir.path()).unwrap())
}

fn syncer(store: &Arc<ManifestStore>, cache: &Arc<SnapshotCache>) -> XdsSyncer {
    let (_tx, rx) = watch::channel(true);
    XdsSyncer::new(store.clone(), store.clone(), cache.clone(), &ControllerConfig::default(), rx)
}

fn route_action(snapshot: &gwplane::xds::EnvoySnapshot) -> Action {
    let rc = snapshot.routes.get("http-routes").expect("route config");
    let vhost = rc
        .virtual_hosts
        .iter()
        .find(|v| v.name == "http~app.example.com")
        .expect("virtual host");
    vhost.routes[0].action.clone().expect("action")
}

#[tokio::test]
async fn granted_cross_namespace_route_is_published() {
    let store = load(&[
        ("gateway.yaml", GATEWAY),
        ("route.yaml", ROUTE),
        ("backend.yaml", BACKEND),
        ("grant.yaml", GRANT),
    ]);
    let cache = Arc::new(SnapshotCache::new());
    let syncer = syncer(&store, &cache);

    let summary = syncer.sync_pass(&DiscoveryInputs::from_index(&store.current())).await;
    assert_eq!(summary.gateways, 1);
    assert_eq!(summary.published, 1);

    let snapshot = cache.get_snapshot("infra~edge").expect("gateway snapshot");
    assert!(snapshot.consistent().is_ok());

    let listener = snapshot.listeners.get("http").expect("listener");
    let Some(address::Address::SocketAddress(socket)) =
        listener.address.as_ref().and_then(|a| a.address.clone())
    else {
        panic!("listener without socket address");
    };
    assert_eq!(socket.address, "::");
    assert_eq!(socket.port_specifier, Some(PortSpecifier::PortValue(8080)));

    match route_action(&snapshot) {
        Action::Route(RouteAction { cluster_specifier: Some(ClusterSpecifier::Cluster(name)), .. }) => {
            assert_eq!(name, "kube_backend_app_80")
        }
        other => panic!("unexpected action: {other:?}"),
    }

    let cla = snapshot.endpoints.get("kube_backend_app_80").expect("load assignment");
    let ips: Vec<_> = cla
        .endpoints
        .iter()
        .flat_map(|l| &l.lb_endpoints)
        .filter_map(|lb| match &lb.host_identifier {
            Some(HostIdentifier::Endpoint(ep)) => match ep.address.as_ref()?.address.as_ref()? {
                address::Address::SocketAddress(sa) => Some(sa.address.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(ips, vec!["10.1.0.5", "10.1.0.6"]);

    let gateway_status = store.gateway_status(&NamespacedName::new("infra", "edge")).unwrap();
    assert!(find_condition(&gateway_status.conditions, types::PROGRAMMED).unwrap().is_true());
    assert_eq!(gateway_status.listeners[0].attached_routes, 1);

    let route_status = store.route_status(&NamespacedName::new("apps", "web")).unwrap();
    let parent = &route_status.parents[0];
    assert_eq!(parent.controller_name, gwplane::config::DEFAULT_CONTROLLER_NAME);
    let accepted = find_condition(&parent.conditions, types::ACCEPTED).unwrap();
    assert!(accepted.is_true());
    assert_eq!(accepted.observed_generation, 3);
    assert!(find_condition(&parent.conditions, types::RESOLVED_REFS).unwrap().is_true());
}

#[tokio::test]
async fn missing_grant_yields_direct_500() {
    let store = load(&[("gateway.yaml", GATEWAY), ("route.yaml", ROUTE), ("backend.yaml", BACKEND)]);
    let cache = Arc::new(SnapshotCache::new());

    syncer(&store, &cache).sync_pass(&DiscoveryInputs::from_index(&store.current())).await;

    let snapshot = cache.get_snapshot("infra~edge").unwrap();
    match route_action(&snapshot) {
        Action::DirectResponse(direct) => assert_eq!(direct.status, 500),
        other => panic!("unexpected action: {other:?}"),
    }

    let route_status = store.route_status(&NamespacedName::new("apps", "web")).unwrap();
    let parent = &route_status.parents[0];
    assert!(find_condition(&parent.conditions, types::ACCEPTED).unwrap().is_true());
    let resolved = find_condition(&parent.conditions, types::RESOLVED_REFS).unwrap();
    assert_eq!(resolved.status, ConditionStatus::False);
    assert_eq!(resolved.reason, reasons::REF_NOT_PERMITTED);
}

#[tokio::test]
async fn deleted_gateway_is_reset_to_empty() {
    let store = load(&[("gateway.yaml", GATEWAY), ("backend.yaml", BACKEND)]);
    let cache = Arc::new(SnapshotCache::new());
    let syncer = syncer(&store, &cache);

    syncer.sync_pass(&DiscoveryInputs::from_index(&store.current())).await;
    assert_ne!(cache.get_snapshot("infra~edge").unwrap().listeners.version(), EMPTY_VERSION);

    store.update(|index| index.remove_gateway(&NamespacedName::new("infra", "edge")));
    let summary = syncer.sync_pass(&DiscoveryInputs::from_index(&store.current())).await;
    assert_eq!(summary.gateways, 0);
    assert_eq!(summary.stale_keys, 1);

    let reset = cache.get_snapshot("infra~edge").unwrap();
    assert_eq!(reset.listeners.version(), EMPTY_VERSION);
    assert!(reset.listeners.is_empty());
}
