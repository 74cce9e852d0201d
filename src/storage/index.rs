//! Point-in-time object index
//!
//! An immutable-by-convention view of every object translation reads. A sync
//! pass takes one `ObjectIndex` and never observes later changes.

use crate::domain::{
    Endpoints, Gateway, HttpRoute, Namespace, NamespacedName, ReferenceGrant, Secret, Service,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ObjectIndex {
    gateways: BTreeMap<NamespacedName, Gateway>,
    http_routes: BTreeMap<NamespacedName, HttpRoute>,
    reference_grants: BTreeMap<NamespacedName, ReferenceGrant>,
    secrets: BTreeMap<NamespacedName, Secret>,
    services: BTreeMap<NamespacedName, Service>,
    endpoints: BTreeMap<NamespacedName, Endpoints>,
    namespaces: BTreeMap<String, Namespace>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.insert_gateway(gateway);
        self
    }

    pub fn with_http_route(mut self, route: HttpRoute) -> Self {
        self.insert_http_route(route);
        self
    }

    pub fn with_reference_grant(mut self, grant: ReferenceGrant) -> Self {
        self.insert_reference_grant(grant);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.insert_secret(secret);
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.insert_service(service);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.insert_endpoints(endpoints);
        self
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.insert_namespace(namespace);
        self
    }

    pub fn insert_gateway(&mut self, gateway: Gateway) {
        self.gateways.insert(gateway.metadata.namespaced_name(), gateway);
    }

    pub fn insert_http_route(&mut self, route: HttpRoute) {
        self.http_routes.insert(route.metadata.namespaced_name(), route);
    }

    pub fn insert_reference_grant(&mut self, grant: ReferenceGrant) {
        self.reference_grants.insert(grant.metadata.namespaced_name(), grant);
    }

    pub fn insert_secret(&mut self, secret: Secret) {
        self.secrets.insert(secret.metadata.namespaced_name(), secret);
    }

    pub fn insert_service(&mut self, service: Service) {
        self.services.insert(service.metadata.namespaced_name(), service);
    }

    pub fn insert_endpoints(&mut self, endpoints: Endpoints) {
        self.endpoints.insert(endpoints.metadata.namespaced_name(), endpoints);
    }

    pub fn insert_namespace(&mut self, namespace: Namespace) {
        self.namespaces.insert(namespace.metadata.name.clone(), namespace);
    }

    pub fn gateways(&self) -> impl Iterator<Item = &Gateway> {
        self.gateways.values()
    }

    pub fn gateway(&self, name: &NamespacedName) -> Option<&Gateway> {
        self.gateways.get(name)
    }

    pub fn gateway_mut(&mut self, name: &NamespacedName) -> Option<&mut Gateway> {
        self.gateways.get_mut(name)
    }

    pub fn http_routes(&self) -> impl Iterator<Item = &HttpRoute> {
        self.http_routes.values()
    }

    pub fn http_route(&self, name: &NamespacedName) -> Option<&HttpRoute> {
        self.http_routes.get(name)
    }

    pub fn http_route_mut(&mut self, name: &NamespacedName) -> Option<&mut HttpRoute> {
        self.http_routes.get_mut(name)
    }

    /// Grants owned by `namespace`
    pub fn reference_grants_in<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a ReferenceGrant> + 'a {
        self.reference_grants.values().filter(move |g| g.metadata.namespace() == namespace)
    }

    pub fn secret(&self, name: &NamespacedName) -> Option<&Secret> {
        self.secrets.get(name)
    }

    pub fn service(&self, name: &NamespacedName) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn endpoints(&self, name: &NamespacedName) -> Option<&Endpoints> {
        self.endpoints.get(name)
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn remove_gateway(&mut self, name: &NamespacedName) -> Option<Gateway> {
        self.gateways.remove(name)
    }

    pub fn remove_http_route(&mut self, name: &NamespacedName) -> Option<HttpRoute> {
        self.http_routes.remove(name)
    }
}
