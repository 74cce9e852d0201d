//! Listener merging and filter-chain construction
//!
//! Gateway listeners that share a (translated) port become one Envoy listener.
//! All HTTP listeners on a port share a single filter chain; every HTTPS
//! listener gets its own chain selected by SNI.

pub mod validation;

pub use validation::validate_listeners;

use super::routes::{sort_routes, translate_route_rules, SortableRoute};
use super::tls::{translate_ssl_config, SslConfig, SslConfigError};
use crate::domain::condition::{reasons, types};
use crate::domain::{ConditionStatus, Gateway, Listener, ProtocolType};
use crate::query::{GatewayQueries, MatchedRoute};
use crate::reports::ReportMap;
use envoy_types::pb::envoy::config::core::v3::{
    address, config_source::ConfigSourceSpecifier, data_source, socket_address::PortSpecifier,
    transport_socket, Address, AggregatedConfigSource, ApiVersion, ConfigSource, DataSource,
    SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener as EnvoyListener,
    ListenerFilter,
};
use envoy_types::pb::envoy::config::route::v3::{RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter, HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, CertificateValidationContext, CommonTlsContext,
    DownstreamTlsContext, TlsCertificate,
};
use envoy_types::pb::google::protobuf::Any;
use fnv::FnvHasher;
use prost::Message;
use std::collections::BTreeMap;
use std::hash::Hasher;
use tracing::warn;

pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const TLS_INSPECTOR_NAME: &str = "envoy.filters.listener.tls_inspector";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// One translated Envoy listener and the route configurations it serves
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerAndRoutes {
    pub listener: EnvoyListener,
    pub route_configs: Vec<RouteConfiguration>,
}

/// Ports below 1024 are shifted so the proxy can bind them unprivileged
pub fn translate_port(port: u16) -> u32 {
    let port = u32::from(port);
    if port < 1024 {
        port + 8000
    } else {
        port
    }
}

pub fn route_config_name(listener_name: &str) -> String {
    format!("{listener_name}-routes")
}

/// Route config name for a filter chain, suffixed by an FNV-64 hash of its
/// sorted SNI domains when the chain matches on SNI
pub fn matched_route_config_name(listener_name: &str, sni_domains: Option<&[String]>) -> String {
    let prefix = route_config_name(listener_name);
    let Some(domains) = sni_domains else {
        return prefix;
    };

    let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = FnvHasher::default();
    for domain in sorted {
        hasher.write(domain.as_bytes());
    }
    format!("{prefix}-{}", hasher.finish())
}

pub fn virtual_host_name(parent: &str, domain: &str) -> String {
    format!("{parent}~{domain}")
}

/// Shared inputs of one gateway's listener translation
pub struct ListenerContext<'q, 'a> {
    pub queries: &'q GatewayQueries<'a>,
    pub gateway: &'a Gateway,
    pub bind_address: &'q str,
}

struct HttpChainParent<'a> {
    routes: Vec<MatchedRoute<'a>>,
}

struct HttpsChain<'a> {
    listener: &'a Listener,
    routes: Vec<MatchedRoute<'a>>,
}

struct MergedListener<'a> {
    name: String,
    port: u32,
    http_parents: Option<Vec<HttpChainParent<'a>>>,
    https_chains: Vec<HttpsChain<'a>>,
}

/// Accumulates validated gateway listeners by translated port
#[derive(Default)]
pub struct ListenerMerger<'a> {
    listeners: Vec<MergedListener<'a>>,
}

impl<'a> ListenerMerger<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validated listener and the routes attached to it
    pub fn append(&mut self, listener: &'a Listener, routes: Vec<MatchedRoute<'a>>) {
        let port = translate_port(listener.port);
        let index = match self.listeners.iter().position(|merged| merged.port == port) {
            Some(index) => {
                let merged = &mut self.listeners[index];
                merged.name = format!("{}~{}", merged.name, listener.name);
                index
            }
            None => {
                self.listeners.push(MergedListener {
                    name: listener.name.clone(),
                    port,
                    http_parents: None,
                    https_chains: Vec::new(),
                });
                self.listeners.len() - 1
            }
        };

        let merged = &mut self.listeners[index];
        match listener.protocol {
            ProtocolType::Http => {
                merged.http_parents.get_or_insert_with(Vec::new).push(HttpChainParent { routes })
            }
            ProtocolType::Https => merged.https_chains.push(HttpsChain { listener, routes }),
            _ => warn!(listener = %listener.name, protocol = %listener.protocol, "Skipping listener with unsupported protocol"),
        }
    }

    /// Build Envoy listeners. Merged listeners left without any filter chain are dropped.
    pub fn translate(
        self,
        ctx: &ListenerContext<'_, 'a>,
        reports: &mut ReportMap,
    ) -> Vec<ListenerAndRoutes> {
        self.listeners
            .into_iter()
            .filter_map(|merged| merged.translate(ctx, reports))
            .collect()
    }
}

impl<'a> MergedListener<'a> {
    fn translate(
        self,
        ctx: &ListenerContext<'_, 'a>,
        reports: &mut ReportMap,
    ) -> Option<ListenerAndRoutes> {
        let mut listener = EnvoyListener {
            name: self.name.clone(),
            address: Some(listener_address(ctx.bind_address, self.port)),
            ..Default::default()
        };
        let mut route_configs = Vec::new();

        if let Some(parents) = &self.http_parents {
            let mut routes_by_host = BTreeMap::new();
            for parent in parents {
                for matched in &parent.routes {
                    collect_routes(ctx.queries, matched, reports, &mut routes_by_host);
                }
            }

            let name = matched_route_config_name(&self.name, None);
            route_configs.push(route_configuration(&name, virtual_hosts(&self.name, routes_by_host)));
            listener.filter_chains.push(filter_chain(&name, None));
        }

        if !self.https_chains.is_empty() {
            listener.listener_filters.push(tls_inspector_filter());
        }

        for chain in &self.https_chains {
            let mut routes_by_host = BTreeMap::new();
            for matched in &chain.routes {
                collect_routes(ctx.queries, matched, reports, &mut routes_by_host);
            }

            let ssl = match translate_ssl_config(ctx.queries, ctx.gateway, chain.listener) {
                Ok(ssl) => ssl,
                Err(err) => {
                    report_tls_failure(ctx.gateway, chain.listener, &err, reports);
                    continue;
                }
            };

            let name = matched_route_config_name(&self.name, Some(ssl.sni_domains.as_slice()));
            route_configs.push(route_configuration(
                &name,
                virtual_hosts(&chain.listener.name, routes_by_host),
            ));
            listener.filter_chains.push(filter_chain(&name, Some(&ssl)));
        }

        if listener.filter_chains.is_empty() {
            warn!(listener = %self.name, "Dropping listener without usable filter chains");
            return None;
        }
        Some(ListenerAndRoutes { listener, route_configs })
    }
}

fn report_tls_failure(
    gateway: &Gateway,
    listener: &Listener,
    err: &SslConfigError,
    reports: &mut ReportMap,
) {
    warn!(
        gateway = %gateway.metadata.namespaced_name(),
        listener = %listener.name,
        error = %err,
        "Listener TLS configuration rejected"
    );
    let report = reports.gateway(gateway).listener(&listener.name);
    match err {
        SslConfigError::Passthrough => {}
        _ => {
            let reason = if err.is_ref_not_permitted() {
                reasons::REF_NOT_PERMITTED
            } else {
                reasons::INVALID_CERTIFICATE_REF
            };
            report.set_condition(types::RESOLVED_REFS, ConditionStatus::False, reason, err.to_string());
        }
    }
    report.set_condition(types::PROGRAMMED, ConditionStatus::False, reasons::INVALID, err.to_string());
}

/// Translate one matched route and file its Envoy routes under each hostname
fn collect_routes(
    queries: &GatewayQueries<'_>,
    matched: &MatchedRoute<'_>,
    reports: &mut ReportMap,
    routes_by_host: &mut BTreeMap<String, Vec<SortableRoute>>,
) {
    let report = reports.route(matched.route).parent_ref(matched.parent_ref);
    let routes = translate_route_rules(queries, matched.route, report);
    if routes.is_empty() {
        return;
    }

    if matched.hostnames.is_empty() {
        routes_by_host.entry("*".to_string()).or_default().extend(routes);
    } else {
        for host in &matched.hostnames {
            routes_by_host.entry(host.clone()).or_default().extend(routes.iter().cloned());
        }
    }
}

/// Virtual hosts, ordered by name
fn virtual_hosts(parent: &str, routes_by_host: BTreeMap<String, Vec<SortableRoute>>) -> Vec<VirtualHost> {
    let mut hosts: Vec<VirtualHost> = routes_by_host
        .into_iter()
        .map(|(host, mut routes)| {
            sort_routes(&mut routes);
            VirtualHost {
                name: virtual_host_name(parent, &host),
                domains: vec![host],
                routes: routes.into_iter().map(|r| r.route).collect(),
                ..Default::default()
            }
        })
        .collect();
    hosts.sort_by(|a, b| a.name.cmp(&b.name));
    hosts
}

fn route_configuration(name: &str, virtual_hosts: Vec<VirtualHost>) -> RouteConfiguration {
    RouteConfiguration {
        name: name.to_string(),
        virtual_hosts,
        ignore_port_in_host_matching: true,
        ..Default::default()
    }
}

fn listener_address(bind_address: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: bind_address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port)),
            ipv4_compat: bind_address == "::",
            ..Default::default()
        })),
    }
}

fn router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        config_type: Some(http_filter::ConfigType::TypedConfig(Any {
            type_url: ROUTER_TYPE_URL.to_string(),
            value: Router::default().encode_to_vec(),
        })),
        is_optional: false,
        disabled: false,
    }
}

/// HCM with RDS over ADS for `route_config_name`
pub fn http_connection_manager(route_config_name: &str) -> HttpConnectionManager {
    HttpConnectionManager {
        stat_prefix: "http".to_string(),
        codec_type: CodecType::Auto as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route_config_name.to_string(),
            config_source: Some(ConfigSource {
                resource_api_version: ApiVersion::V3 as i32,
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource::default(),
                )),
                ..Default::default()
            }),
        })),
        http_filters: vec![router_filter()],
        ..Default::default()
    }
}

fn filter_chain(route_config_name: &str, ssl: Option<&SslConfig>) -> FilterChain {
    let hcm = http_connection_manager(route_config_name);
    FilterChain {
        name: route_config_name.to_string(),
        filter_chain_match: ssl.map(|ssl| FilterChainMatch {
            server_names: ssl.sni_domains.clone(),
            ..Default::default()
        }),
        filters: vec![Filter {
            name: HCM_FILTER_NAME.to_string(),
            config_type: Some(filter::ConfigType::TypedConfig(Any {
                type_url: HCM_TYPE_URL.to_string(),
                value: hcm.encode_to_vec(),
            })),
        }],
        transport_socket: ssl.map(downstream_tls_socket),
        ..Default::default()
    }
}

fn inline_bytes(bytes: &[u8]) -> DataSource {
    DataSource {
        specifier: Some(data_source::Specifier::InlineBytes(bytes.to_vec())),
        ..Default::default()
    }
}

fn downstream_tls_socket(ssl: &SslConfig) -> TransportSocket {
    let bundle = &ssl.bundle;
    let common = CommonTlsContext {
        tls_certificates: vec![TlsCertificate {
            certificate_chain: Some(inline_bytes(&bundle.cert_chain)),
            private_key: Some(inline_bytes(&bundle.private_key)),
            ..Default::default()
        }],
        validation_context_type: bundle.ca.as_deref().map(|ca| {
            ValidationContextType::ValidationContext(CertificateValidationContext {
                trusted_ca: Some(inline_bytes(ca)),
                ..Default::default()
            })
        }),
        ..Default::default()
    };
    let context = DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() };

    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(transport_socket::ConfigType::TypedConfig(Any {
            type_url: DOWNSTREAM_TLS_TYPE_URL.to_string(),
            value: context.encode_to_vec(),
        })),
    }
}

fn tls_inspector_filter() -> ListenerFilter {
    ListenerFilter {
        name: TLS_INSPECTOR_NAME.to_string(),
        config_type: Some(listener_filter::ConfigType::TypedConfig(Any {
            type_url: TLS_INSPECTOR_TYPE_URL.to_string(),
            value: TlsInspector::default().encode_to_vec(),
        })),
        ..Default::default()
    }
}

/// Route config name referenced by an HCM filter, if the filter is one
pub fn rds_route_config_name(filter: &Filter) -> Option<String> {
    if filter.name != HCM_FILTER_NAME {
        return None;
    }
    let Some(filter::ConfigType::TypedConfig(any)) = &filter.config_type else {
        return None;
    };
    if any.type_url != HCM_TYPE_URL {
        return None;
    }
    match HttpConnectionManager::decode(any.value.as_slice()).ok()?.route_specifier? {
        RouteSpecifier::Rds(rds) => Some(rds.route_config_name),
        _ => None,
    }
}
