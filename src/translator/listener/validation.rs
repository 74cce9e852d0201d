//! Listener validation
//!
//! Rejected listeners are excluded from translation; the rest of the Gateway
//! is still programmed.

use super::translate_port;
use crate::domain::condition::{reasons, types};
use crate::domain::{ConditionStatus, Gateway, Listener, ProtocolType};
use crate::query::route_kinds_for_listener;
use crate::reports::GatewayReport;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

fn is_supported_protocol(protocol: &ProtocolType) -> bool {
    matches!(protocol, ProtocolType::Http | ProtocolType::Https)
}

/// Validate the listeners of `gateway`, returning those that may be translated
pub fn validate_listeners<'g>(gateway: &'g Gateway, report: &mut GatewayReport) -> Vec<&'g Listener> {
    let mut candidates = Vec::new();

    for listener in &gateway.spec.listeners {
        let (valid_kinds, invalid_kinds) = route_kinds_for_listener(listener);
        let listener_report = report.listener(&listener.name);
        listener_report.supported_kinds = Some(valid_kinds);

        if !is_supported_protocol(&listener.protocol) {
            listener_report.set_condition(
                types::ACCEPTED,
                ConditionStatus::False,
                reasons::UNSUPPORTED_PROTOCOL,
                format!("protocol {} is not supported", listener.protocol),
            );
            continue;
        }

        if !invalid_kinds.is_empty() {
            let kinds: Vec<_> = invalid_kinds.iter().map(|k| k.kind.as_str()).collect();
            listener_report.set_condition(
                types::RESOLVED_REFS,
                ConditionStatus::False,
                reasons::INVALID_ROUTE_KINDS,
                format!("unsupported route kinds: {}", kinds.join(", ")),
            );
            continue;
        }

        candidates.push(listener);
    }

    // Grouped by the port the proxy binds, which is also the merge key.
    let mut by_port: BTreeMap<u32, Vec<&Listener>> = BTreeMap::new();
    for listener in candidates.iter().copied() {
        by_port.entry(translate_port(listener.port)).or_default().push(listener);
    }

    let mut conflicted = BTreeSet::new();
    for (port, listeners) in &by_port {
        let protocols: BTreeSet<_> = listeners.iter().map(|l| &l.protocol).collect();
        if protocols.len() > 1 {
            for listener in listeners {
                report.listener(&listener.name).set_condition(
                    types::CONFLICTED,
                    ConditionStatus::True,
                    reasons::PROTOCOL_CONFLICT,
                    format!("port {port} is used with more than one protocol"),
                );
                conflicted.insert(listener.name.as_str());
            }
            continue;
        }

        let mut hostnames: BTreeMap<&str, usize> = BTreeMap::new();
        for listener in listeners {
            *hostnames.entry(listener.hostname_or_empty()).or_default() += 1;
        }
        for listener in listeners {
            if hostnames[listener.hostname_or_empty()] > 1 {
                report.listener(&listener.name).set_condition(
                    types::CONFLICTED,
                    ConditionStatus::True,
                    reasons::HOSTNAME_CONFLICT,
                    format!(
                        "hostname {:?} is used by more than one listener on port {port}",
                        listener.hostname_or_empty()
                    ),
                );
                conflicted.insert(listener.name.as_str());
            }
        }
    }

    for name in &conflicted {
        report.listener(name).set_condition(
            types::PROGRAMMED,
            ConditionStatus::False,
            reasons::INVALID,
            "listener conflicts with another listener on the same port",
        );
    }

    let valid: Vec<&Listener> =
        candidates.into_iter().filter(|l| !conflicted.contains(l.name.as_str())).collect();

    if valid.is_empty() {
        debug!(gateway = %gateway.metadata.namespaced_name(), "No valid listeners");
        report.set_condition(
            types::ACCEPTED,
            ConditionStatus::False,
            reasons::LISTENERS_NOT_VALID,
            "no valid listeners",
        );
        report.set_condition(
            types::PROGRAMMED,
            ConditionStatus::False,
            reasons::INVALID,
            "no valid listeners",
        );
    }

    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::find_condition;
    use crate::domain::{AllowedRoutes, GatewaySpec, ObjectMeta, RouteGroupKind, GATEWAY_GROUP};
    use crate::reports::ReportMap;

    fn gateway(listeners: Vec<Listener>) -> Gateway {
        Gateway {
            metadata: ObjectMeta::new("default", "gw"),
            spec: GatewaySpec { gateway_class_name: "gwplane".into(), listeners },
            status: None,
        }
    }

    fn reason<'a>(report: &'a GatewayReport, listener: &str, type_: &str) -> Option<&'a str> {
        find_condition(report.listener_report(listener)?.conditions(), type_)
            .map(|c| c.reason.as_str())
    }

    #[test]
    fn same_port_without_hostnames_conflicts() {
        let gw = gateway(vec![
            Listener::new("a", 8080, ProtocolType::Http),
            Listener::new("b", 8080, ProtocolType::Http),
        ]);
        let mut reports = ReportMap::new();
        let valid = validate_listeners(&gw, reports.gateway(&gw));
        assert!(valid.is_empty());

        let report = reports.gateway(&gw);
        assert_eq!(reason(report, "a", types::CONFLICTED), Some(reasons::HOSTNAME_CONFLICT));
        assert_eq!(reason(report, "b", types::CONFLICTED), Some(reasons::HOSTNAME_CONFLICT));
        let accepted = find_condition(report.conditions(), types::ACCEPTED).unwrap();
        assert_eq!(accepted.reason, reasons::LISTENERS_NOT_VALID);
        let programmed = find_condition(report.conditions(), types::PROGRAMMED).unwrap();
        assert_eq!(programmed.reason, reasons::INVALID);
    }

    #[test]
    fn mixed_protocols_on_one_port_conflict() {
        let gw = gateway(vec![
            Listener::new("http", 8443, ProtocolType::Http).with_hostname("a.com"),
            Listener::new("https", 8443, ProtocolType::Https).with_hostname("b.com"),
            Listener::new("other", 9000, ProtocolType::Http),
        ]);
        let mut reports = ReportMap::new();
        let valid = validate_listeners(&gw, reports.gateway(&gw));
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].name, "other");

        let report = reports.gateway(&gw);
        assert_eq!(reason(report, "http", types::CONFLICTED), Some(reasons::PROTOCOL_CONFLICT));
        assert_eq!(reason(report, "https", types::CONFLICTED), Some(reasons::PROTOCOL_CONFLICT));
        assert!(find_condition(report.conditions(), types::ACCEPTED).is_none());
    }

    #[test]
    fn distinct_hostnames_share_a_port() {
        let gw = gateway(vec![
            Listener::new("a", 80, ProtocolType::Http).with_hostname("a.com"),
            Listener::new("b", 80, ProtocolType::Http).with_hostname("b.com"),
            Listener::new("c", 80, ProtocolType::Http),
        ]);
        let mut reports = ReportMap::new();
        assert_eq!(validate_listeners(&gw, reports.gateway(&gw)).len(), 3);
    }

    #[test]
    fn shifted_port_collides_with_declared_port() {
        let gw = gateway(vec![
            Listener::new("http", 80, ProtocolType::Http),
            Listener::new("https", 8080, ProtocolType::Https).with_hostname("example.com"),
        ]);
        let mut reports = ReportMap::new();
        assert!(validate_listeners(&gw, reports.gateway(&gw)).is_empty());

        let report = reports.gateway(&gw);
        assert_eq!(reason(report, "http", types::CONFLICTED), Some(reasons::PROTOCOL_CONFLICT));
        assert_eq!(reason(report, "https", types::CONFLICTED), Some(reasons::PROTOCOL_CONFLICT));
        assert_eq!(reason(report, "http", types::PROGRAMMED), Some(reasons::INVALID));
    }

    #[test]
    fn shifted_port_shares_hostname_conflicts() {
        let gw = gateway(vec![
            Listener::new("a", 443, ProtocolType::Https).with_hostname("example.com"),
            Listener::new("b", 8443, ProtocolType::Https).with_hostname("example.com"),
            Listener::new("c", 8443, ProtocolType::Https).with_hostname("other.com"),
        ]);
        let mut reports = ReportMap::new();
        let valid = validate_listeners(&gw, reports.gateway(&gw));
        assert_eq!(valid.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(), vec!["c"]);

        let report = reports.gateway(&gw);
        assert_eq!(reason(report, "a", types::CONFLICTED), Some(reasons::HOSTNAME_CONFLICT));
        assert_eq!(reason(report, "b", types::CONFLICTED), Some(reasons::HOSTNAME_CONFLICT));
    }

    #[test]
    fn unsupported_protocol_and_kinds_are_excluded() {
        let mut bad_kinds = Listener::new("kinds", 8080, ProtocolType::Http);
        bad_kinds.allowed_routes = Some(AllowedRoutes {
            namespaces: None,
            kinds: vec![RouteGroupKind::new(GATEWAY_GROUP, "GRPCRoute")],
        });
        let gw = gateway(vec![
            Listener::new("tcp", 9000, ProtocolType::Tcp),
            bad_kinds,
            Listener::new("ok", 8081, ProtocolType::Http),
        ]);
        let mut reports = ReportMap::new();
        let valid = validate_listeners(&gw, reports.gateway(&gw));
        assert_eq!(valid.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(), vec!["ok"]);

        let report = reports.gateway(&gw);
        assert_eq!(reason(report, "tcp", types::ACCEPTED), Some(reasons::UNSUPPORTED_PROTOCOL));
        assert_eq!(reason(report, "kinds", types::RESOLVED_REFS), Some(reasons::INVALID_ROUTE_KINDS));
        assert_eq!(
            report.listener_report("kinds").unwrap().supported_kinds,
            Some(vec![])
        );
    }
}
