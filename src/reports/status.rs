//! Status assembly from reports

use super::{GatewayReport, RouteReport};
use crate::domain::condition::{find_condition, reasons, types};
use crate::domain::{
    Condition, ConditionStatus, Gateway, GatewayStatus, HttpRoute, HttpRouteStatus,
    ListenerStatus, RouteParentStatus,
};

/// Merge a freshly built condition set over the previous one.
///
/// Conditions whose type and status are unchanged keep the old
/// `lastTransitionTime`. Old conditions of types not present in `new` are kept.
pub fn merge_preserving_transition_time(old: &[Condition], new: Vec<Condition>) -> Vec<Condition> {
    let mut merged: Vec<Condition> = new
        .into_iter()
        .map(|mut condition| {
            if let Some(previous) = find_condition(old, &condition.type_) {
                if previous.status == condition.status {
                    condition.last_transition_time = previous.last_transition_time;
                }
            }
            condition
        })
        .collect();

    for previous in old {
        if find_condition(&merged, &previous.type_).is_none() {
            merged.push(previous.clone());
        }
    }
    merged
}

fn with_defaults(
    mut conditions: Vec<Condition>,
    defaults: &[(&str, &str)],
    generation: i64,
) -> Vec<Condition> {
    for (type_, reason) in defaults {
        if find_condition(&conditions, type_).is_none() {
            let mut condition = Condition::new(*type_, ConditionStatus::True, *reason, "");
            condition.observed_generation = generation;
            conditions.push(condition);
        }
    }
    conditions
}

fn listener_defaults(generation: i64) -> Vec<Condition> {
    let mut conflicted =
        Condition::new(types::CONFLICTED, ConditionStatus::False, reasons::NO_CONFLICTS, "");
    conflicted.observed_generation = generation;
    vec![conflicted]
}

/// Gateway status for one pass, merged against the Gateway's current status
pub fn build_gateway_status(gateway: &Gateway, report: &GatewayReport) -> GatewayStatus {
    let generation = gateway.metadata.generation;
    let previous = gateway.status.clone().unwrap_or_default();

    let conditions = with_defaults(
        report.conditions().to_vec(),
        &[(types::ACCEPTED, reasons::ACCEPTED), (types::PROGRAMMED, reasons::PROGRAMMED)],
        generation,
    );

    let listeners = gateway
        .spec
        .listeners
        .iter()
        .map(|listener| {
            let listener_report = report.listener_report(&listener.name);
            let mut conditions = listener_report.map(|r| r.conditions().to_vec()).unwrap_or_default();
            if find_condition(&conditions, types::CONFLICTED).is_none() {
                conditions.extend(listener_defaults(generation));
            }
            let conditions = with_defaults(
                conditions,
                &[
                    (types::ACCEPTED, reasons::ACCEPTED),
                    (types::RESOLVED_REFS, reasons::RESOLVED_REFS),
                    (types::PROGRAMMED, reasons::PROGRAMMED),
                ],
                generation,
            );

            let old = previous
                .listeners
                .iter()
                .find(|status| status.name == listener.name)
                .map(|status| status.conditions.as_slice())
                .unwrap_or_default();

            ListenerStatus {
                name: listener.name.clone(),
                supported_kinds: listener_report
                    .and_then(|r| r.supported_kinds.clone())
                    .unwrap_or_default(),
                attached_routes: listener_report.map_or(0, |r| r.attached_routes),
                conditions: merge_preserving_transition_time(old, conditions),
            }
        })
        .collect();

    GatewayStatus {
        conditions: merge_preserving_transition_time(&previous.conditions, conditions),
        listeners,
    }
}

/// Route status for one pass.
///
/// Entries owned by other controllers are carried over untouched. Entries for
/// this controller are replaced by the parents in `report`.
pub fn build_route_status(
    route: &HttpRoute,
    report: &RouteReport,
    controller_name: &str,
) -> HttpRouteStatus {
    let generation = route.metadata.generation;
    let previous = route.status.clone().unwrap_or_default();

    let mut parents: Vec<RouteParentStatus> = previous
        .parents
        .iter()
        .filter(|parent| parent.controller_name != controller_name)
        .cloned()
        .collect();

    for parent in report.parents() {
        let conditions = with_defaults(
            parent.conditions().to_vec(),
            &[
                (types::ACCEPTED, reasons::ACCEPTED),
                (types::RESOLVED_REFS, reasons::RESOLVED_REFS),
            ],
            generation,
        );
        let old = previous
            .parents
            .iter()
            .find(|p| p.controller_name == controller_name && p.parent_ref == parent.parent_ref)
            .map(|p| p.conditions.as_slice())
            .unwrap_or_default();

        parents.push(RouteParentStatus {
            parent_ref: parent.parent_ref.clone(),
            controller_name: controller_name.to_string(),
            conditions: merge_preserving_transition_time(old, conditions),
        });
    }

    HttpRouteStatus { parents }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GatewaySpec, Listener, ObjectMeta, ParentReference, ProtocolType};
    use crate::reports::ReportMap;
    use chrono::{Duration, Utc};

    fn aged(type_: &str, status: ConditionStatus, reason: &str) -> Condition {
        let mut condition = Condition::new(type_, status, reason, "");
        condition.last_transition_time = Utc::now() - Duration::hours(2);
        condition
    }

    #[test]
    fn merge_keeps_time_for_unchanged_status() {
        let old = vec![
            aged(types::ACCEPTED, ConditionStatus::True, reasons::ACCEPTED),
            aged(types::PROGRAMMED, ConditionStatus::True, reasons::PROGRAMMED),
            aged("example.com/Custom", ConditionStatus::True, "Custom"),
        ];
        let new = vec![
            Condition::new(types::ACCEPTED, ConditionStatus::True, reasons::ACCEPTED, ""),
            Condition::new(types::PROGRAMMED, ConditionStatus::False, reasons::INVALID, ""),
        ];

        let merged = merge_preserving_transition_time(&old, new);
        assert_eq!(merged.len(), 3);

        let accepted = find_condition(&merged, types::ACCEPTED).unwrap();
        assert_eq!(accepted.last_transition_time, old[0].last_transition_time);
        let programmed = find_condition(&merged, types::PROGRAMMED).unwrap();
        assert!(programmed.last_transition_time > old[1].last_transition_time);
        assert!(find_condition(&merged, "example.com/Custom").is_some());
    }

    fn gateway() -> Gateway {
        Gateway {
            metadata: ObjectMeta { generation: 4, ..ObjectMeta::new("default", "gw") },
            spec: GatewaySpec {
                gateway_class_name: "gwplane".into(),
                listeners: vec![
                    Listener::new("http", 8080, ProtocolType::Http),
                    Listener::new("tcp", 9000, ProtocolType::Tcp),
                ],
            },
            status: None,
        }
    }

    #[test]
    fn gateway_status_fills_defaults() {
        let gw = gateway();
        let mut reports = ReportMap::new();
        {
            let report = reports.gateway(&gw);
            report.listener("http").attached_routes = 2;
            report.listener("tcp").set_condition(
                types::ACCEPTED,
                ConditionStatus::False,
                reasons::UNSUPPORTED_PROTOCOL,
                "TCP is not supported",
            );
        }
        let status =
            build_gateway_status(&gw, reports.gateway_report(&gw.metadata.namespaced_name()).unwrap());

        assert!(find_condition(&status.conditions, types::ACCEPTED).unwrap().is_true());
        assert!(find_condition(&status.conditions, types::PROGRAMMED).unwrap().is_true());
        assert!(status.conditions.iter().all(|c| c.observed_generation == 4));

        let http = &status.listeners[0];
        assert_eq!(http.attached_routes, 2);
        assert_eq!(http.conditions.len(), 4);
        let conflicted = find_condition(&http.conditions, types::CONFLICTED).unwrap();
        assert_eq!(conflicted.status, ConditionStatus::False);
        assert_eq!(conflicted.reason, reasons::NO_CONFLICTS);

        let tcp = &status.listeners[1];
        let accepted = find_condition(&tcp.conditions, types::ACCEPTED).unwrap();
        assert_eq!(accepted.reason, reasons::UNSUPPORTED_PROTOCOL);
    }

    #[test]
    fn gateway_status_preserves_previous_timestamps() {
        let mut gw = gateway();
        let old_accepted = aged(types::ACCEPTED, ConditionStatus::True, reasons::ACCEPTED);
        gw.status = Some(GatewayStatus { conditions: vec![old_accepted.clone()], listeners: vec![] });
        let mut reports = ReportMap::new();
        reports.gateway(&gw);

        let status =
            build_gateway_status(&gw, reports.gateway_report(&gw.metadata.namespaced_name()).unwrap());
        let accepted = find_condition(&status.conditions, types::ACCEPTED).unwrap();
        assert_eq!(accepted.last_transition_time, old_accepted.last_transition_time);
    }

    #[test]
    fn route_status_keeps_other_controllers() {
        let foreign = RouteParentStatus {
            parent_ref: ParentReference::gateway("other"),
            controller_name: "example.com/other".into(),
            conditions: vec![aged(types::ACCEPTED, ConditionStatus::True, reasons::ACCEPTED)],
        };
        let stale = RouteParentStatus {
            parent_ref: ParentReference::gateway("removed"),
            controller_name: "gwplane.dev/gateway-controller".into(),
            conditions: vec![],
        };
        let route = HttpRoute {
            metadata: ObjectMeta::new("default", "r"),
            status: Some(HttpRouteStatus { parents: vec![foreign.clone(), stale] }),
            ..Default::default()
        };
        let mut reports = ReportMap::new();
        reports.route(&route).parent_ref(&ParentReference::gateway("gw")).set_condition(
            types::RESOLVED_REFS,
            ConditionStatus::False,
            reasons::BACKEND_NOT_FOUND,
            "service default/missing not found",
        );

        let report = reports.route_report(&route.metadata.namespaced_name()).unwrap();
        let status = build_route_status(&route, report, "gwplane.dev/gateway-controller");

        assert_eq!(status.parents.len(), 2);
        assert_eq!(status.parents[0], foreign);
        let ours = &status.parents[1];
        assert_eq!(ours.parent_ref.name, "gw");
        assert!(find_condition(&ours.conditions, types::ACCEPTED).unwrap().is_true());
        let resolved = find_condition(&ours.conditions, types::RESOLVED_REFS).unwrap();
        assert_eq!(resolved.reason, reasons::BACKEND_NOT_FOUND);
    }
}
