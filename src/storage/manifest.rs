//! File-backed cluster state
//!
//! Loads Kubernetes manifests (multi-document YAML) into an in-memory
//! [`ObjectIndex`]. Status writes land on the stored objects so they show up
//! in the next snapshot, exactly like a status patch against the API server.

use super::{ClusterState, ObjectIndex, StatusWriter};
use crate::domain::{
    Endpoints, Gateway, GatewayStatus, HttpRoute, HttpRouteStatus, Namespace, NamespacedName,
    ReferenceGrant, Secret, Service,
};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ManifestStore {
    index: RwLock<ObjectIndex>,
    revision: watch::Sender<u64>,
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new(ObjectIndex::default())
    }
}

impl ManifestStore {
    pub fn new(index: ObjectIndex) -> Self {
        let (revision, _) = watch::channel(0);
        Self { index: RwLock::new(index), revision }
    }

    /// Load every `.yaml`/`.yml`/`.json` file in `dir`, in file name order
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = std::fs::read_dir(dir)
            .map_err(|e| Error::io(e, format!("Failed to read manifest directory {}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml") | Some("json")
                )
            })
            .collect::<Vec<_>>();
        paths.sort();

        let store = Self::default();
        for path in paths {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::io(e, format!("Failed to read {}", path.display())))?;
            let count = store.apply_yaml(&contents)?;
            info!(file = %path.display(), objects = count, "Loaded manifests");
        }
        Ok(store)
    }

    /// Apply every document in `yaml`, replacing objects with the same identity.
    /// Returns the number of objects applied.
    pub fn apply_yaml(&self, yaml: &str) -> Result<usize> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            objects.push(value);
        }

        let mut applied = 0;
        self.update(|index| -> Result<()> {
            for value in objects {
                if apply_object(index, value)? {
                    applied += 1;
                }
            }
            Ok(())
        })?;
        Ok(applied)
    }

    /// Mutate the stored objects and notify watchers
    pub fn update<T>(&self, f: impl FnOnce(&mut ObjectIndex) -> T) -> T {
        let result = {
            let mut guard = self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        };
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    /// Receiver that observes every object change (status writes excluded)
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn current(&self) -> ObjectIndex {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn gateway_status(&self, name: &NamespacedName) -> Option<GatewayStatus> {
        self.current().gateway(name).and_then(|gw| gw.status.clone())
    }

    pub fn route_status(&self, name: &NamespacedName) -> Option<HttpRouteStatus> {
        self.current().http_route(name).and_then(|route| route.status.clone())
    }
}

fn apply_object(index: &mut ObjectIndex, value: serde_yaml::Value) -> Result<bool> {
    let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string();
    match kind.as_str() {
        "Gateway" => index.insert_gateway(serde_yaml::from_value::<Gateway>(value)?),
        "HTTPRoute" => index.insert_http_route(serde_yaml::from_value::<HttpRoute>(value)?),
        "ReferenceGrant" => {
            index.insert_reference_grant(serde_yaml::from_value::<ReferenceGrant>(value)?)
        }
        "Secret" => index.insert_secret(serde_yaml::from_value::<Secret>(value)?),
        "Service" => index.insert_service(serde_yaml::from_value::<Service>(value)?),
        "Endpoints" => index.insert_endpoints(serde_yaml::from_value::<Endpoints>(value)?),
        "Namespace" => index.insert_namespace(serde_yaml::from_value::<Namespace>(value)?),
        other => {
            debug!(kind = %other, "Skipping unsupported manifest kind");
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl ClusterState for ManifestStore {
    async fn snapshot(&self) -> Result<ObjectIndex> {
        Ok(self.current())
    }
}

#[async_trait]
impl StatusWriter for ManifestStore {
    async fn write_gateway_status(
        &self,
        name: &NamespacedName,
        status: GatewayStatus,
    ) -> Result<()> {
        let mut guard = self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let gateway = guard
            .gateway_mut(name)
            .ok_or_else(|| Error::storage(format!("Gateway {} not found", name)))?;
        gateway.status = Some(status);
        Ok(())
    }

    async fn write_route_status(
        &self,
        name: &NamespacedName,
        status: HttpRouteStatus,
    ) -> Result<()> {
        let mut guard = self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let route = guard
            .http_route_mut(name)
            .ok_or_else(|| Error::storage(format!("HTTPRoute {} not found", name)))?;
        route.status = Some(status);
        Ok(())
    }
}
