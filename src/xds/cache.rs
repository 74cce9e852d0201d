//! Keyed snapshot cache
//!
//! Snapshots are stored per cache key. Gateways publish under
//! [`gateway_cache_key`]; proxies find their key through node metadata.

use super::snapshot::EnvoySnapshot;
use crate::domain::Gateway;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::google::protobuf::value::Kind;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Key served to proxies that do not identify a known Gateway
pub const FALLBACK_KEY: &str = "misconfigured-node";

/// Node metadata field carrying the proxy's cache key
pub const ROLE_METADATA_KEY: &str = "role";

const UPDATE_CHANNEL_CAPACITY: usize = 128;

pub fn gateway_cache_key(gateway: &Gateway) -> String {
    format!("{}~{}", gateway.metadata.namespace(), gateway.metadata.name)
}

/// Cache key of a connecting proxy: metadata `role`, then node id, then the fallback
pub fn node_cache_key(node: Option<&Node>) -> String {
    let Some(node) = node else {
        return FALLBACK_KEY.to_string();
    };

    let role = node
        .metadata
        .as_ref()
        .and_then(|meta| meta.fields.get(ROLE_METADATA_KEY))
        .and_then(|value| match value.kind.as_ref() {
            Some(Kind::StringValue(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });

    match role {
        Some(role) => role,
        None if !node.id.is_empty() => node.id.clone(),
        None => FALLBACK_KEY.to_string(),
    }
}

/// Snapshots by cache key, with change notification
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<BTreeMap<String, Arc<EnvoySnapshot>>>,
    status_keys: RwLock<BTreeSet<String>>,
    updates: broadcast::Sender<String>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            snapshots: RwLock::new(BTreeMap::new()),
            status_keys: RwLock::new(BTreeSet::new()),
            updates,
        }
    }

    pub fn set_snapshot(&self, key: &str, snapshot: EnvoySnapshot) {
        self.snapshots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), Arc::new(snapshot));
        debug!(key = %key, "Snapshot updated");
        let _ = self.updates.send(key.to_string());
    }

    pub fn get_snapshot(&self, key: &str) -> Option<Arc<EnvoySnapshot>> {
        self.snapshots.read().unwrap_or_else(|poisoned| poisoned.into_inner()).get(key).cloned()
    }

    pub fn clear_snapshot(&self, key: &str) {
        let removed = self
            .snapshots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some();
        if removed {
            debug!(key = %key, "Snapshot cleared");
            let _ = self.updates.send(key.to_string());
        }
    }

    /// Keys with a stored snapshot
    pub fn snapshot_keys(&self) -> Vec<String> {
        self.snapshots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Record that a proxy with `key` has connected
    pub fn register_node(&self, key: &str) {
        self.status_keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string());
    }

    /// Keys of every proxy that has connected
    pub fn status_keys(&self) -> Vec<String> {
        self.status_keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Receiver of the keys whose snapshot changed
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectMeta;
    use envoy_types::pb::google::protobuf::{Struct, Value};
    use std::collections::HashMap;

    fn node(id: &str, role: Option<&str>) -> Node {
        let metadata = role.map(|role| {
            let mut fields = HashMap::new();
            fields.insert(
                ROLE_METADATA_KEY.to_string(),
                Value { kind: Some(Kind::StringValue(role.to_string())) },
            );
            Struct { fields }
        });
        Node { id: id.to_string(), metadata, ..Default::default() }
    }

    #[test]
    fn gateway_key_is_namespace_and_name() {
        let gateway = Gateway { metadata: ObjectMeta::new("infra", "edge"), ..Default::default() };
        assert_eq!(gateway_cache_key(&gateway), "infra~edge");
    }

    #[test]
    fn node_key_prefers_role() {
        assert_eq!(node_cache_key(Some(&node("envoy-1", Some("infra~edge")))), "infra~edge");
        assert_eq!(node_cache_key(Some(&node("envoy-1", Some("")))), "envoy-1");
        assert_eq!(node_cache_key(Some(&node("envoy-1", None))), "envoy-1");
        assert_eq!(node_cache_key(Some(&node("", None))), FALLBACK_KEY);
        assert_eq!(node_cache_key(None), FALLBACK_KEY);
    }

    #[tokio::test]
    async fn set_and_clear_notify_subscribers() {
        let cache = SnapshotCache::new();
        let mut rx = cache.subscribe();

        cache.set_snapshot("a", EnvoySnapshot::empty());
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(cache.get_snapshot("a").is_some());
        assert_eq!(cache.snapshot_keys(), vec!["a".to_string()]);

        cache.clear_snapshot("a");
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(cache.get_snapshot("a").is_none());

        cache.clear_snapshot("a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn status_keys_track_connected_nodes() {
        let cache = SnapshotCache::new();
        cache.register_node("b");
        cache.register_node("a");
        cache.register_node("b");
        assert_eq!(cache.status_keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(cache.snapshot_keys().is_empty());
    }
}
