//! # Envoy Snapshots
//!
//! An [`EnvoySnapshot`] bundles the four resource collections served to one
//! proxy. Before a snapshot is published every EDS reference made by a
//! cluster must have exactly one load assignment and every RDS reference made
//! by a listener must have exactly one route configuration;
//! [`EnvoySnapshot::make_consistent`] repairs a snapshot until that holds.

use super::{CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL};
use crate::discovery::DiscoveryInputs;
use crate::translator::listener::rds_route_config_name;
use crate::translator::ListenerAndRoutes;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{ClusterDiscoveryType, DiscoveryType};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    route, route_match::PathSpecifier, DirectResponseAction, Route, RouteConfiguration,
    RouteMatch, VirtualHost,
};
use envoy_types::pb::google::protobuf::Any;
use fnv::FnvHasher;
use prost::Message;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use tracing::{debug, warn};

/// Version of every collection in [`EnvoySnapshot::empty`]
pub const EMPTY_VERSION: &str = "empty";

/// Body served by placeholder route configurations
pub const PLACEHOLDER_ROUTE_BODY: &str = "Invalid Envoy Configuration: the route configuration \
    referenced by this listener was not generated. This placeholder localizes the failure to \
    the misconfigured route.";

/// Referential integrity violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("EDS references {expected:?} do not match endpoints {actual:?}")]
    Endpoints { expected: Vec<String>, actual: Vec<String> },

    #[error("RDS references {expected:?} do not match route configurations {actual:?}")]
    Routes { expected: Vec<String>, actual: Vec<String> },
}

/// A versioned collection of one resource type, keyed by resource name
#[derive(Debug, Clone, PartialEq)]
pub struct Resources<T> {
    version: String,
    items: BTreeMap<String, T>,
}

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self { version: EMPTY_VERSION.to_string(), items: BTreeMap::new() }
    }
}

impl<T: Message> Resources<T> {
    /// Build from named items. Later duplicates replace earlier ones.
    pub fn from_items(items: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut resources = Self { version: String::new(), items: items.into_iter().collect() };
        resources.recompute_version();
        resources
    }

    /// FNV-64 over names and encoded bytes, in name order
    fn recompute_version(&mut self) {
        let mut hasher = FnvHasher::default();
        for (name, item) in &self.items {
            hasher.write(name.as_bytes());
            hasher.write(&item.encode_to_vec());
        }
        self.version = format!("{:016x}", hasher.finish());
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn to_any(&self, type_url: &str, names: &[String]) -> Vec<Any> {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        self.items
            .iter()
            .filter(|(name, _)| wanted.is_empty() || wanted.contains(name.as_str()))
            .map(|(_, item)| Any { type_url: type_url.to_string(), value: item.encode_to_vec() })
            .collect()
    }
}

/// The four typed collections served to one proxy
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvoySnapshot {
    pub clusters: Resources<Cluster>,
    pub endpoints: Resources<ClusterLoadAssignment>,
    pub routes: Resources<RouteConfiguration>,
    pub listeners: Resources<Listener>,
}

impl EnvoySnapshot {
    pub fn new(
        clusters: Vec<Cluster>,
        endpoints: Vec<ClusterLoadAssignment>,
        routes: Vec<RouteConfiguration>,
        listeners: Vec<Listener>,
    ) -> Self {
        Self {
            clusters: Resources::from_items(clusters.into_iter().map(|c| (c.name.clone(), c))),
            endpoints: Resources::from_items(
                endpoints.into_iter().map(|e| (e.cluster_name.clone(), e)),
            ),
            routes: Resources::from_items(routes.into_iter().map(|r| (r.name.clone(), r))),
            listeners: Resources::from_items(listeners.into_iter().map(|l| (l.name.clone(), l))),
        }
    }

    /// Snapshot with no resources and every version set to `empty`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fold translated listeners and discovery output into one snapshot
    pub fn from_translation(translated: Vec<ListenerAndRoutes>, discovery: &DiscoveryInputs) -> Self {
        let mut listeners = Vec::with_capacity(translated.len());
        let mut routes = Vec::new();
        for item in translated {
            listeners.push(item.listener);
            routes.extend(item.route_configs);
        }
        Self::new(discovery.clusters.clone(), discovery.endpoints.clone(), routes, listeners)
    }

    /// EDS service names referenced by EDS clusters
    pub fn eds_references(&self) -> BTreeSet<String> {
        self.clusters
            .iter()
            .filter(|(_, cluster)| {
                cluster.cluster_discovery_type
                    == Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32))
            })
            .map(|(name, cluster)| {
                cluster
                    .eds_cluster_config
                    .as_ref()
                    .map(|eds| eds.service_name.clone())
                    .filter(|service_name| !service_name.is_empty())
                    .unwrap_or_else(|| name.clone())
            })
            .collect()
    }

    /// Route configuration names referenced through RDS by listener filter chains
    pub fn rds_references(&self) -> BTreeSet<String> {
        self.listeners
            .iter()
            .flat_map(|(_, listener)| {
                listener.filter_chains.iter().chain(listener.default_filter_chain.as_ref())
            })
            .flat_map(|chain| chain.filters.iter())
            .filter_map(rds_route_config_name)
            .collect()
    }

    /// Check referential integrity without changing anything
    pub fn consistent(&self) -> Result<(), ConsistencyError> {
        let expected = self.eds_references();
        let actual: BTreeSet<String> = self.endpoints.names().cloned().collect();
        if expected != actual {
            return Err(ConsistencyError::Endpoints {
                expected: expected.into_iter().collect(),
                actual: actual.into_iter().collect(),
            });
        }

        let expected = self.rds_references();
        let actual: BTreeSet<String> = self.routes.names().cloned().collect();
        if expected != actual {
            return Err(ConsistencyError::Routes {
                expected: expected.into_iter().collect(),
                actual: actual.into_iter().collect(),
            });
        }
        Ok(())
    }

    /// Add placeholders for dangling references and drop unreferenced
    /// endpoints and routes. Idempotent.
    pub fn make_consistent(&mut self) {
        let eds = self.eds_references();
        let endpoints_changed = reconcile(&mut self.endpoints, &eds, |name| ClusterLoadAssignment {
            cluster_name: name.to_string(),
            ..Default::default()
        });

        let rds = self.rds_references();
        let routes_changed = reconcile(&mut self.routes, &rds, placeholder_route_config);

        if endpoints_changed || routes_changed {
            debug!(
                endpoints = self.endpoints.len(),
                routes = self.routes.len(),
                "Repaired snapshot references"
            );
        }
    }

    /// Version of the collection served under `type_url`
    pub fn version_for(&self, type_url: &str) -> Option<&str> {
        match type_url {
            CLUSTER_TYPE_URL => Some(self.clusters.version()),
            ENDPOINT_TYPE_URL => Some(self.endpoints.version()),
            ROUTE_TYPE_URL => Some(self.routes.version()),
            LISTENER_TYPE_URL => Some(self.listeners.version()),
            _ => None,
        }
    }

    /// `Any`-encoded resources for `type_url`, limited to `names` unless empty
    pub fn resources_for(&self, type_url: &str, names: &[String]) -> Option<Vec<Any>> {
        match type_url {
            CLUSTER_TYPE_URL => Some(self.clusters.to_any(type_url, names)),
            ENDPOINT_TYPE_URL => Some(self.endpoints.to_any(type_url, names)),
            ROUTE_TYPE_URL => Some(self.routes.to_any(type_url, names)),
            LISTENER_TYPE_URL => Some(self.listeners.to_any(type_url, names)),
            other => {
                warn!(type_url = %other, "Unknown resource type requested");
                None
            }
        }
    }
}

/// Make the names of `resources` equal `referenced`, returning whether
/// anything changed
fn reconcile<T: Message>(
    resources: &mut Resources<T>,
    referenced: &BTreeSet<String>,
    placeholder: impl Fn(&str) -> T,
) -> bool {
    let before = resources.items.len();
    resources.items.retain(|name, _| referenced.contains(name));
    let mut changed = resources.items.len() != before;

    for name in referenced {
        if !resources.items.contains_key(name) {
            warn!(resource = %name, "Adding placeholder for missing resource");
            resources.items.insert(name.clone(), placeholder(name));
            changed = true;
        }
    }

    if changed {
        resources.recompute_version();
    }
    changed
}

/// Route configuration answering every request with a 500
pub fn placeholder_route_config(name: &str) -> RouteConfiguration {
    RouteConfiguration {
        name: name.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: "*".to_string(),
            domains: vec!["*".to_string()],
            routes: vec![Route {
                r#match: Some(RouteMatch {
                    path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                    ..Default::default()
                }),
                action: Some(route::Action::DirectResponse(DirectResponseAction {
                    status: 500,
                    body: Some(DataSource {
                        specifier: Some(data_source::Specifier::InlineString(
                            PLACEHOLDER_ROUTE_BODY.to_string(),
                        )),
                        ..Default::default()
                    }),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}
