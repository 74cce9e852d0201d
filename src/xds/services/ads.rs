//! State-of-the-world ADS over the snapshot cache
//!
//! Each stream resolves its node key on the first request, answers requests
//! from that key's snapshot (or the fallback key's), and pushes fresh
//! responses for every subscribed type whenever the cache changes the key.
//!
//! ACK and NACK are recognised by the nonce last sent for the type URL:
//! an ACK for an unchanged subscription is not answered, a NACK is logged and
//! left unanswered until the next snapshot.

use crate::xds::cache::{node_cache_key, SnapshotCache, FALLBACK_KEY};
use crate::xds::snapshot::EMPTY_VERSION;
use crate::xds::{ENDPOINT_TYPE_URL, ROUTE_TYPE_URL};
use crate::xds_span;
use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const RESPONSE_CHANNEL_CAPACITY: usize = 100;

/// Last response sent for one type URL
#[derive(Debug, Clone)]
struct LastSent {
    version: String,
    nonce: String,
}

#[derive(Debug, Default)]
struct Subscription {
    resource_names: Vec<String>,
    last_sent: Option<LastSent>,
}

/// ADS service backed by a [`SnapshotCache`]
#[derive(Debug, Clone)]
pub struct AdsService {
    cache: Arc<SnapshotCache>,
}

impl AdsService {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }
}

/// Only EDS and RDS are filtered by name; CDS and LDS are always wildcard
fn filters_by_name(type_url: &str) -> bool {
    type_url == ENDPOINT_TYPE_URL || type_url == ROUTE_TYPE_URL
}

/// Build the response for `type_url` from the node's snapshot, falling back
/// to the fallback key and then to an empty response
fn build_response(
    cache: &SnapshotCache,
    node_key: &str,
    type_url: &str,
    resource_names: &[String],
) -> DiscoveryResponse {
    let snapshot = cache.get_snapshot(node_key).or_else(|| cache.get_snapshot(FALLBACK_KEY));
    let names = if filters_by_name(type_url) { resource_names } else { &[] };

    let (version, resources) = match snapshot {
        Some(snapshot) => (
            snapshot.version_for(type_url).unwrap_or(EMPTY_VERSION).to_string(),
            snapshot.resources_for(type_url, names).unwrap_or_default(),
        ),
        None => (EMPTY_VERSION.to_string(), Vec::new()),
    };

    DiscoveryResponse {
        version_info: version,
        resources,
        type_url: type_url.to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

/// Run the SotW loop for one stream, returning the response stream
pub fn run_ads_stream<S>(
    cache: Arc<SnapshotCache>,
    mut in_stream: S,
) -> ReceiverStream<Result<DiscoveryResponse, Status>>
where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
    let mut updates = cache.subscribe();

    tokio::spawn(async move {
        let mut node_key: Option<String> = None;
        let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

        loop {
            tokio::select! {
                request = in_stream.next() => {
                    let request = match request {
                        Some(Ok(request)) => request,
                        Some(Err(status)) => {
                            warn!(error = %status, "Error receiving discovery request");
                            break;
                        }
                        None => {
                            info!(node_key = ?node_key, "ADS stream ended by client");
                            break;
                        }
                    };

                    let key = node_key
                        .get_or_insert_with(|| {
                            let key = node_cache_key(request.node.as_ref());
                            cache.register_node(&key);
                            info!(
                                node_key = %key,
                                node_id = ?request.node.as_ref().map(|n| &n.id),
                                "New ADS stream"
                            );
                            key
                        })
                        .clone();

                    let span = xds_span!("discovery_request", key, type_url = %request.type_url);
                    let response = async {
                        let subscription = subscriptions.entry(request.type_url.clone()).or_default();
                        if let Some(last) = &subscription.last_sent {
                            if !request.response_nonce.is_empty() && request.response_nonce != last.nonce {
                                debug!(nonce = %request.response_nonce, "Ignoring request with stale nonce");
                                return None;
                            }
                            if let Some(error) = &request.error_detail {
                                warn!(
                                    nonce = %request.response_nonce,
                                    error_code = error.code,
                                    error_message = %error.message,
                                    "[NACK] Envoy rejected previous response"
                                );
                                subscription.resource_names = request.resource_names.clone();
                                return None;
                            }
                            if request.response_nonce == last.nonce
                                && request.version_info == last.version
                                && request.resource_names == subscription.resource_names
                            {
                                debug!(version = %last.version, "[ACK] Skipping unchanged subscription");
                                return None;
                            }
                        }

                        subscription.resource_names = request.resource_names.clone();
                        let response = build_response(
                            &cache,
                            &key,
                            &request.type_url,
                            &subscription.resource_names,
                        );
                        subscription.last_sent = Some(LastSent {
                            version: response.version_info.clone(),
                            nonce: response.nonce.clone(),
                        });
                        debug!(
                            version = %response.version_info,
                            resource_count = response.resources.len(),
                            "Sending discovery response"
                        );
                        Some(response)
                    }
                    .instrument(span)
                    .await;

                    if let Some(response) = response {
                        if tx.send(Ok(response)).await.is_err() {
                            debug!("Discovery response receiver dropped");
                            break;
                        }
                    }
                }
                update = updates.recv() => {
                    let Some(key) = node_key.clone() else { continue };
                    match update {
                        Ok(changed) if changed != key && changed != FALLBACK_KEY => continue,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(node_key = %key, skipped, "Missed snapshot notifications, resending");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(node_key = %key, "Snapshot notification channel closed");
                            break;
                        }
                    }

                    let mut closed = false;
                    for (type_url, subscription) in subscriptions.iter_mut() {
                        let response =
                            build_response(&cache, &key, type_url, &subscription.resource_names);
                        let unchanged = subscription
                            .last_sent
                            .as_ref()
                            .is_some_and(|last| last.version == response.version_info);
                        if unchanged {
                            continue;
                        }

                        info!(
                            node_key = %key,
                            type_url = %type_url,
                            version = %response.version_info,
                            resource_count = response.resources.len(),
                            "Pushing snapshot update"
                        );
                        subscription.last_sent = Some(LastSent {
                            version: response.version_info.clone(),
                            nonce: response.nonce.clone(),
                        });
                        if tx.send(Ok(response)).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        debug!("Discovery response receiver dropped");
                        break;
                    }
                }
                _ = tx.closed() => {
                    debug!(node_key = ?node_key, "ADS client went away");
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let responses = run_ads_stream(self.cache.clone(), request.into_inner());
        Ok(Response::new(Box::pin(responses) as Self::StreamAggregatedResourcesStream))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta ADS is not supported"))
    }
}
