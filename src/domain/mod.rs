//! Domain layer
//!
//! Typed Gateway API and core Kubernetes objects consumed by the translator.
//! The types deserialize straight from Kubernetes YAML/JSON manifests and
//! carry only the fields translation reads; everything else is ignored.
//!
//! ## Module Organization
//!
//! - `meta`: object identity, group/kind defaults and label selectors
//! - `gateway`: `Gateway` and its listeners
//! - `http_route`: `HTTPRoute`, parent references, rules and filters
//! - `reference_grant`: cross-namespace reference authorization
//! - `corev1`: `Secret`, `Service`, `Endpoints` and `Namespace`
//! - `condition`: Kubernetes-style status conditions and their reasons

pub mod condition;
pub mod corev1;
pub mod gateway;
pub mod http_route;
pub mod meta;
pub mod reference_grant;

pub use condition::{Condition, ConditionStatus};
pub use corev1::{
    CA_CERT_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE,
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace, Secret, Service, ServicePort,
    ServiceSpec,
};
pub use gateway::{
    AllowedRoutes, FromNamespaces, Gateway, GatewaySpec, GatewayStatus, GatewayTlsConfig, Listener,
    ListenerStatus, ProtocolType, RouteGroupKind, RouteNamespaces, SecretObjectReference, TlsMode,
};
pub use http_route::{
    BackendRef, HeaderMatchType, HttpHeader, HttpHeaderFilter, HttpHeaderMatch, HttpPathMatch,
    HttpPathModifier, HttpQueryParamMatch, HttpRequestRedirectFilter, HttpRoute, HttpRouteFilter,
    HttpRouteFilterType, HttpRouteMatch, HttpRouteRule, HttpRouteSpec, HttpRouteStatus,
    HttpUrlRewriteFilter, ParentReference, PathMatchType, PathModifierType, RouteParentStatus,
};
pub use meta::{
    core_if_empty, GroupKind, LabelSelector, LabelSelectorOperator, LabelSelectorRequirement,
    NamespacedName, ObjectMeta, CORE_GROUP, DEFAULT_NAMESPACE, GATEWAY_GROUP, GATEWAY_KIND,
    HTTP_ROUTE_KIND, SECRET_KIND, SERVICE_KIND,
};
pub use reference_grant::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
