//! # Envoy xDS
//!
//! Snapshot assembly, the keyed snapshot cache and the Aggregated Discovery
//! Service that delivers snapshots to proxies.
//!
//! Only the state-of-the-world ADS protocol is served; delta requests are
//! rejected as unimplemented.

pub mod cache;
pub mod services;
pub mod snapshot;

pub use cache::{gateway_cache_key, node_cache_key, SnapshotCache, FALLBACK_KEY};
pub use services::AdsService;
pub use snapshot::{ConsistencyError, EnvoySnapshot, Resources, EMPTY_VERSION};

use crate::config::XdsConfig;
use crate::{Error, Result};
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

/// The ADS gRPC service over `cache`
pub fn ads_server(cache: Arc<SnapshotCache>) -> AggregatedDiscoveryServiceServer<AdsService> {
    AggregatedDiscoveryServiceServer::new(AdsService::new(cache))
}

/// Serve ADS on the configured address until `shutdown_signal` resolves
pub async fn start_xds_server<F>(
    config: &XdsConfig,
    cache: Arc<SnapshotCache>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .socket_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid xDS address: {}", e)))?;

    info!(address = %addr, "Starting xDS server");

    Server::builder()
        .add_service(ads_server(cache))
        .serve_with_shutdown(addr, shutdown_signal)
        .await
        .map_err(|e| {
            let error_msg = e.to_string();
            if error_msg.contains("Address already in use") || error_msg.contains("bind") {
                Error::transport(format!(
                    "xDS server failed to bind to {}: port {} is already in use",
                    addr,
                    addr.port()
                ))
            } else {
                Error::transport(format!("xDS server failed: {}", e))
            }
        })?;

    info!("xDS server stopped");
    Ok(())
}
