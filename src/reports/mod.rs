//! # Translation Reports
//!
//! A [`ReportMap`] is built fresh by every translation pass. Translators
//! record only what went wrong (or a non-default outcome); [`status`] fills in
//! the positive defaults and merges against the previous status so that
//! `lastTransitionTime` only moves when a condition actually flips.

pub mod status;

pub use status::{build_gateway_status, build_route_status, merge_preserving_transition_time};

use crate::domain::{
    condition::set_condition, Condition, ConditionStatus, Gateway, HttpRoute, NamespacedName,
    ParentReference, RouteGroupKind,
};
use std::collections::BTreeMap;

/// Per-pass accumulator of gateway and route conditions
#[derive(Debug, Clone, Default)]
pub struct ReportMap {
    gateways: BTreeMap<NamespacedName, GatewayReport>,
    routes: BTreeMap<NamespacedName, RouteReport>,
}

impl ReportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report for `gateway`, created on first use
    pub fn gateway(&mut self, gateway: &Gateway) -> &mut GatewayReport {
        self.gateways
            .entry(gateway.metadata.namespaced_name())
            .or_insert_with(|| GatewayReport::new(gateway.metadata.generation))
    }

    /// Report for `route`, created on first use
    pub fn route(&mut self, route: &HttpRoute) -> &mut RouteReport {
        self.routes
            .entry(route.metadata.namespaced_name())
            .or_insert_with(|| RouteReport::new(route.metadata.generation))
    }

    pub fn gateway_report(&self, name: &NamespacedName) -> Option<&GatewayReport> {
        self.gateways.get(name)
    }

    pub fn route_report(&self, name: &NamespacedName) -> Option<&RouteReport> {
        self.routes.get(name)
    }

    pub fn gateway_reports(&self) -> impl Iterator<Item = (&NamespacedName, &GatewayReport)> {
        self.gateways.iter()
    }

    pub fn route_reports(&self) -> impl Iterator<Item = (&NamespacedName, &RouteReport)> {
        self.routes.iter()
    }
}

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    generation: i64,
) -> Condition {
    let mut condition = Condition::new(type_, status, reason, message);
    condition.observed_generation = generation;
    condition
}

#[derive(Debug, Clone, Default)]
pub struct GatewayReport {
    generation: i64,
    conditions: Vec<Condition>,
    listeners: BTreeMap<String, ListenerReport>,
}

impl GatewayReport {
    fn new(generation: i64) -> Self {
        Self { generation, ..Default::default() }
    }

    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        set_condition(
            &mut self.conditions,
            condition(type_, status, reason, message, self.generation),
        );
    }

    /// Listener report by listener name, created on first use
    pub fn listener(&mut self, name: &str) -> &mut ListenerReport {
        let generation = self.generation;
        self.listeners
            .entry(name.to_string())
            .or_insert_with(|| ListenerReport { generation, ..Default::default() })
    }

    pub fn listener_report(&self, name: &str) -> Option<&ListenerReport> {
        self.listeners.get(name)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerReport {
    generation: i64,
    conditions: Vec<Condition>,
    /// Valid route kinds; `None` until validation runs
    pub supported_kinds: Option<Vec<RouteGroupKind>>,
    pub attached_routes: i32,
}

impl ListenerReport {
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        set_condition(
            &mut self.conditions,
            condition(type_, status, reason, message, self.generation),
        );
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteReport {
    generation: i64,
    parents: Vec<ParentRefReport>,
}

impl RouteReport {
    fn new(generation: i64) -> Self {
        Self { generation, parents: Vec::new() }
    }

    /// Report for one parent reference, created on first use
    pub fn parent_ref(&mut self, parent_ref: &ParentReference) -> &mut ParentRefReport {
        let position = self.parents.iter().position(|p| p.parent_ref == *parent_ref);
        let index = match position {
            Some(index) => index,
            None => {
                self.parents.push(ParentRefReport {
                    parent_ref: parent_ref.clone(),
                    generation: self.generation,
                    conditions: Vec::new(),
                });
                self.parents.len() - 1
            }
        };
        &mut self.parents[index]
    }

    pub fn parents(&self) -> &[ParentRefReport] {
        &self.parents
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
pub struct ParentRefReport {
    pub parent_ref: ParentReference,
    generation: i64,
    conditions: Vec<Condition>,
}

impl ParentRefReport {
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        set_condition(
            &mut self.conditions,
            condition(type_, status, reason, message, self.generation),
        );
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{find_condition, reasons, types};
    use crate::domain::ObjectMeta;

    #[test]
    fn reports_are_created_once() {
        let mut gw = Gateway { metadata: ObjectMeta::new("default", "gw"), ..Default::default() };
        gw.metadata.generation = 3;
        let mut reports = ReportMap::new();

        reports.gateway(&gw).listener("http").attached_routes += 1;
        reports.gateway(&gw).listener("http").attached_routes += 1;

        let report = reports.gateway_report(&gw.metadata.namespaced_name()).unwrap();
        assert_eq!(report.listener_report("http").unwrap().attached_routes, 2);
        assert_eq!(report.generation(), 3);
    }

    #[test]
    fn parent_ref_reports_are_keyed_by_reference() {
        let route = HttpRoute { metadata: ObjectMeta::new("default", "r"), ..Default::default() };
        let mut reports = ReportMap::new();
        let a = ParentReference::gateway("a");
        let b = ParentReference::gateway("b");

        reports.route(&route).parent_ref(&a).set_condition(
            types::ACCEPTED,
            ConditionStatus::False,
            reasons::NO_MATCHING_PARENT,
            "no matching parent",
        );
        reports.route(&route).parent_ref(&b);
        reports.route(&route).parent_ref(&a);

        let report = reports.route_report(&route.metadata.namespaced_name()).unwrap();
        assert_eq!(report.parents().len(), 2);
        let accepted = find_condition(report.parents()[0].conditions(), types::ACCEPTED).unwrap();
        assert_eq!(accepted.reason, reasons::NO_MATCHING_PARENT);
    }
}
