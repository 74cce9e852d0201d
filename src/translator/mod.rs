//! # Gateway Translation
//!
//! Turns one Gateway and the routes attached to it into Envoy listeners and
//! route configurations, recording every problem in a [`ReportMap`].
//!
//! A pass runs in four steps:
//!
//! 1. match routes to listeners ([`GatewayQueries::routes_for_gateway`])
//! 2. validate listeners
//! 3. merge listeners by port
//! 4. build filter chains and route configurations
//!
//! Translation never fails as a whole; it produces a best-effort result plus
//! conditions describing what was left out.

pub mod listener;
pub mod routes;
pub mod tls;

pub use listener::{
    translate_port, validate_listeners, ListenerAndRoutes, ListenerContext, ListenerMerger,
};
pub use routes::{sort_routes, translate_route_rules, SortableRoute};
pub use tls::{validate_tls_secret, SslConfig, TlsBundle, TlsValidationError};

use crate::domain::condition::{reasons, types};
use crate::domain::{ConditionStatus, Gateway};
use crate::query::GatewayQueries;
use crate::reports::ReportMap;
use crate::translate_span;
use std::collections::BTreeSet;
use tracing::debug;

/// Translates Gateways for one proxy bind address
#[derive(Debug, Clone)]
pub struct GatewayTranslator {
    proxy_bind_address: String,
}

impl GatewayTranslator {
    pub fn new(proxy_bind_address: impl Into<String>) -> Self {
        Self { proxy_bind_address: proxy_bind_address.into() }
    }

    pub fn translate_gateway(
        &self,
        queries: &GatewayQueries<'_>,
        gateway: &Gateway,
        reports: &mut ReportMap,
    ) -> Vec<ListenerAndRoutes> {
        let gateway_name = gateway.metadata.namespaced_name();
        let span = translate_span!(gateway_name);
        let _guard = span.enter();

        let routes = queries.routes_for_gateway(gateway);

        for route_error in &routes.route_errors {
            reports.route(route_error.route).parent_ref(route_error.parent_ref).set_condition(
                types::ACCEPTED,
                ConditionStatus::False,
                route_error.error.route_reason(),
                route_error.error.to_string(),
            );
        }

        for (listener_name, result) in &routes.listener_results {
            let attached: BTreeSet<_> =
                result.routes.iter().map(|m| m.route.metadata.namespaced_name()).collect();
            let listener_report = reports.gateway(gateway).listener(listener_name);
            listener_report.attached_routes = i32::try_from(attached.len()).unwrap_or(i32::MAX);
            if let Some(err) = &result.error {
                listener_report.set_condition(
                    types::PROGRAMMED,
                    ConditionStatus::False,
                    reasons::INVALID,
                    err.to_string(),
                );
            }

            for matched in &result.routes {
                reports.route(matched.route).parent_ref(matched.parent_ref);
            }
        }

        let valid = validate_listeners(gateway, reports.gateway(gateway));

        let mut merger = ListenerMerger::new();
        for listener in valid {
            let matched = routes
                .listener_results
                .get(&listener.name)
                .map(|result| result.routes.clone())
                .unwrap_or_default();
            merger.append(listener, matched);
        }

        let ctx = ListenerContext { queries, gateway, bind_address: &self.proxy_bind_address };
        let translated = merger.translate(&ctx, reports);
        debug!(
            gateway = %gateway_name,
            listeners = translated.len(),
            route_errors = routes.route_errors.len(),
            "Translated gateway"
        );
        translated
    }
}
