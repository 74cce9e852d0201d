//! # Service Discovery
//!
//! Converts Services and Endpoints into EDS clusters and load assignments.
//! Every object change recomputes the full set. It is handed to the syncer
//! only when it differs from the last one handed over.

use crate::domain::{EndpointSubset, Endpoints, Service, ServicePort};
use crate::storage::{ClusterState, ObjectIndex};
use crate::syncer::AsyncQueue;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    address, config_source::ConfigSourceSpecifier, socket_address::PortSpecifier, Address,
    AggregatedConfigSource, ApiVersion, ConfigSource, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::google::protobuf::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: i64 = 5;

/// Name of the EDS cluster serving `port` of Service `namespace/service`
pub fn cluster_name(namespace: &str, service: &str, port: u16) -> String {
    format!("kube_{namespace}_{service}_{port}")
}

/// Full discovery output for one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryInputs {
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
}

impl DiscoveryInputs {
    /// One cluster per Service port, one load assignment per cluster
    pub fn from_index(index: &ObjectIndex) -> Self {
        let mut inputs = Self::default();
        for service in index.services() {
            let endpoints = index.endpoints(&service.metadata.namespaced_name());
            for port in &service.spec.ports {
                let name = cluster_name(service.metadata.namespace(), &service.metadata.name, port.port);
                inputs.clusters.push(eds_cluster(&name));
                inputs.endpoints.push(load_assignment(&name, service, port, endpoints));
            }
        }
        inputs
    }
}

fn ads_config_source() -> ConfigSource {
    ConfigSource {
        resource_api_version: ApiVersion::V3 as i32,
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        ..Default::default()
    }
}

fn eds_cluster(name: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(ads_config_source()),
            service_name: String::new(),
        }),
        connect_timeout: Some(Duration { seconds: CONNECT_TIMEOUT_SECS, nanos: 0 }),
        ..Default::default()
    }
}

/// Endpoint port of `subset` serving `service_port`: matched by name, or the
/// only port of the subset when the service port is unnamed
fn subset_port(subset: &EndpointSubset, service_port: &ServicePort) -> Option<u16> {
    match service_port.name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => subset
            .ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| p.port),
        None => match subset.ports.as_slice() {
            [only] => Some(only.port),
            _ => None,
        },
    }
}

fn lb_endpoint(ip: &str, port: u16) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(address::Address::SocketAddress(SocketAddress {
                    address: ip.to_string(),
                    port_specifier: Some(PortSpecifier::PortValue(u32::from(port))),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn load_assignment(
    name: &str,
    service: &Service,
    port: &ServicePort,
    endpoints: Option<&Endpoints>,
) -> ClusterLoadAssignment {
    let mut lb_endpoints = Vec::new();
    for subset in endpoints.map(|e| e.subsets.as_slice()).unwrap_or_default() {
        let Some(target) = subset_port(subset, port) else {
            debug!(
                service = %service.metadata.namespaced_name(),
                port = port.port,
                "No matching endpoint port in subset"
            );
            continue;
        };
        lb_endpoints.extend(subset.addresses.iter().map(|addr| lb_endpoint(&addr.ip, target)));
    }

    ClusterLoadAssignment {
        cluster_name: name.to_string(),
        endpoints: if lb_endpoints.is_empty() {
            Vec::new()
        } else {
            vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }]
        },
        ..Default::default()
    }
}

/// Recompute discovery on every store change until cancelled.
///
/// The first computation runs immediately so the syncer warms up without
/// waiting for a change.
pub async fn run_discovery(
    state: Arc<dyn ClusterState>,
    mut changes: watch::Receiver<u64>,
    queue: Arc<AsyncQueue<DiscoveryInputs>>,
    cancel: CancellationToken,
) {
    info!("Starting discovery pipeline");
    let mut last: Option<DiscoveryInputs> = None;
    loop {
        match state.snapshot().await {
            Ok(index) => {
                let inputs = DiscoveryInputs::from_index(&index);
                if last.as_ref() == Some(&inputs) {
                    debug!("Discovery inputs unchanged");
                } else {
                    debug!(
                        clusters = inputs.clusters.len(),
                        endpoints = inputs.endpoints.len(),
                        "Computed discovery inputs"
                    );
                    queue.enqueue(inputs.clone());
                    last = Some(inputs);
                }
            }
            Err(e) => warn!(error = %e, "Failed to read cluster state for discovery"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Object store closed");
                    break;
                }
            }
        }
    }
    info!("Discovery pipeline stopped");
}
