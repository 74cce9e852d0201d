//! Route-to-listener matching
//!
//! For every HTTPRoute parent reference that names a Gateway, each listener
//! is checked in turn: route kind, port/section, namespace policy, then
//! hostname intersection. A parent reference that attaches nowhere reports the
//! failure from the listener that got furthest through those checks.

use super::{hostname_intersect, GatewayQueries, QueryError};
use crate::domain::{
    FromNamespaces, Gateway, HttpRoute, Listener, ParentReference, ProtocolType, RouteGroupKind,
    GATEWAY_GROUP, GATEWAY_KIND, HTTP_ROUTE_KIND,
};
use std::collections::BTreeMap;

/// A route attached to a listener through one parent reference
#[derive(Debug, Clone)]
pub struct MatchedRoute<'a> {
    pub route: &'a HttpRoute,
    pub parent_ref: &'a ParentReference,
    /// Intersected hostnames; empty means every host
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListenerResult<'a> {
    pub routes: Vec<MatchedRoute<'a>>,
    /// Listener configuration problem found while matching (a selector-less
    /// `From: Selector` policy)
    pub error: Option<QueryError>,
}

/// A parent reference that did not attach to any listener
#[derive(Debug, Clone)]
pub struct RouteError<'a> {
    pub route: &'a HttpRoute,
    pub parent_ref: &'a ParentReference,
    pub error: QueryError,
}

#[derive(Debug, Clone, Default)]
pub struct RoutesForGatewayResult<'a> {
    /// Keyed by listener name
    pub listener_results: BTreeMap<String, ListenerResult<'a>>,
    pub route_errors: Vec<RouteError<'a>>,
}

/// How far a parent reference got against one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Unevaluated,
    KindRejected,
    ParentMismatch,
    NamespaceRejected,
    HostnameMismatch,
    Attached,
}

impl Stage {
    fn error(self) -> QueryError {
        match self {
            Stage::KindRejected | Stage::NamespaceRejected => QueryError::NotAllowedByListeners,
            Stage::HostnameMismatch => QueryError::NoMatchingListenerHostname,
            Stage::Unevaluated | Stage::ParentMismatch | Stage::Attached => {
                QueryError::NoMatchingParent
            }
        }
    }
}

/// Route kinds a listener supports, split into (valid, invalid).
///
/// Without explicit `allowedRoutes.kinds` the protocol's defaults apply.
pub fn route_kinds_for_listener(listener: &Listener) -> (Vec<RouteGroupKind>, Vec<RouteGroupKind>) {
    let supported: Vec<RouteGroupKind> = match listener.protocol {
        ProtocolType::Http | ProtocolType::Https => {
            vec![RouteGroupKind::new(GATEWAY_GROUP, HTTP_ROUTE_KIND)]
        }
        _ => Vec::new(),
    };

    let requested = listener
        .allowed_routes
        .as_ref()
        .map(|allowed| allowed.kinds.as_slice())
        .unwrap_or_default();
    if requested.is_empty() {
        return (supported, Vec::new());
    }

    requested.iter().map(RouteGroupKind::defaulted).partition(|kind| supported.contains(kind))
}

/// Whether a parent reference names this Gateway at all
pub fn is_parent_ref_for_gateway(
    parent_ref: &ParentReference,
    route: &HttpRoute,
    gateway: &Gateway,
) -> bool {
    parent_ref.group_or_default() == GATEWAY_GROUP
        && parent_ref.kind_or_default() == GATEWAY_KIND
        && parent_ref.namespace_or(route.metadata.namespace()) == gateway.metadata.namespace()
        && parent_ref.name == gateway.metadata.name
}

fn parent_ref_matches_listener(parent_ref: &ParentReference, listener: &Listener) -> bool {
    parent_ref.port.map_or(true, |port| port == listener.port)
        && parent_ref.section_name.as_deref().map_or(true, |section| section == listener.name)
}

impl<'a> GatewayQueries<'a> {
    /// Match every HTTPRoute in the index against the listeners of `gateway`
    pub fn routes_for_gateway(&self, gateway: &Gateway) -> RoutesForGatewayResult<'a> {
        let mut result = RoutesForGatewayResult::default();
        for listener in &gateway.spec.listeners {
            result.listener_results.insert(listener.name.clone(), ListenerResult::default());
        }

        for route in self.index().http_routes() {
            for parent_ref in &route.spec.parent_refs {
                if !is_parent_ref_for_gateway(parent_ref, route, gateway) {
                    continue;
                }

                let mut furthest = Stage::Unevaluated;
                for listener in &gateway.spec.listeners {
                    let stage = self.match_listener(gateway, listener, route, parent_ref, &mut result);
                    furthest = furthest.max(stage);
                }

                if furthest != Stage::Attached {
                    result.route_errors.push(RouteError { route, parent_ref, error: furthest.error() });
                }
            }
        }

        result
    }

    fn match_listener(
        &self,
        gateway: &Gateway,
        listener: &Listener,
        route: &'a HttpRoute,
        parent_ref: &'a ParentReference,
        result: &mut RoutesForGatewayResult<'a>,
    ) -> Stage {
        let (allowed_kinds, _) = route_kinds_for_listener(listener);
        if !allowed_kinds.contains(&RouteGroupKind::new(GATEWAY_GROUP, HTTP_ROUTE_KIND)) {
            return Stage::KindRejected;
        }

        if !parent_ref_matches_listener(parent_ref, listener) {
            return Stage::ParentMismatch;
        }

        let listener_result = result.listener_results.entry(listener.name.clone()).or_default();
        match self.namespace_allowed(gateway, listener, route) {
            Ok(true) => {}
            Ok(false) => return Stage::NamespaceRejected,
            Err(err) => {
                listener_result.error = Some(err);
                return Stage::NamespaceRejected;
            }
        }

        match hostname_intersect(listener.hostname.as_deref(), &route.spec.hostnames) {
            Some(hostnames) => {
                listener_result.routes.push(MatchedRoute { route, parent_ref, hostnames });
                Stage::Attached
            }
            None => Stage::HostnameMismatch,
        }
    }

    fn namespace_allowed(
        &self,
        gateway: &Gateway,
        listener: &Listener,
        route: &HttpRoute,
    ) -> Result<bool, QueryError> {
        let policy = listener.allowed_routes.as_ref().and_then(|allowed| allowed.namespaces.as_ref());
        let from = policy.map(|p| p.from).unwrap_or_default();
        let route_ns = route.metadata.namespace();

        match from {
            FromNamespaces::All => Ok(true),
            FromNamespaces::Same => Ok(route_ns == gateway.metadata.namespace()),
            FromNamespaces::Selector => {
                let selector = policy
                    .and_then(|p| p.selector.as_ref())
                    .ok_or(QueryError::SelectorNotSet)?;
                let matches = match self.index().namespace(route_ns) {
                    Some(ns) => selector.matches(&ns.metadata.labels),
                    None => selector.matches(&Default::default()),
                };
                Ok(matches)
            }
        }
    }
}
