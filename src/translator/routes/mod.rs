//! HTTPRoute rule translation
//!
//! Every (rule, match) pair of an HTTPRoute becomes one Envoy `Route`.
//! Backend resolution problems are recorded on the parent reference report
//! and never abort translation.

pub mod sort;

pub use sort::{compare_specificity, sort_routes};

use crate::discovery::cluster_name;
use crate::domain::condition::{reasons, types};
use crate::domain::{
    BackendRef, ConditionStatus, GroupKind, HeaderMatchType, HttpHeaderFilter, HttpPathModifier,
    HttpRequestRedirectFilter, HttpRoute, HttpRouteFilterType, HttpRouteMatch, HttpRouteRule,
    HttpUrlRewriteFilter, PathMatchType, PathModifierType,
};
use crate::query::{FromObject, GatewayQueries, QueryError};
use crate::reports::ParentRefReport;
use envoy_types::pb::envoy::config::core::v3::{
    data_source, header_value_option::HeaderAppendAction, DataSource, HeaderValue,
    HeaderValueOption,
};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    query_parameter_matcher::QueryParameterMatchSpecifier,
    redirect_action::{PathRewriteSpecifier, RedirectResponseCode, SchemeRewriteSpecifier},
    route::Action,
    route_action::{ClusterSpecifier, HostRewriteSpecifier},
    route_match::PathSpecifier,
    weighted_cluster::ClusterWeight,
    DirectResponseAction, HeaderMatcher, QueryParameterMatcher, RedirectAction, Route,
    RouteAction, RouteMatch, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatchAndSubstitute, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::UInt32Value;
use regex::Regex;
use tracing::debug;

/// Body of the response served when a rule has no usable backend
pub const NO_VALID_BACKENDS_BODY: &str = "no valid backends for this route";

/// One translated (rule, match) pair, ordered before emission
#[derive(Debug, Clone)]
pub struct SortableRoute {
    pub route: Route,
    pub namespace: String,
    pub name: String,
    pub rule_index: usize,
    pub match_index: usize,
    pub route_match: HttpRouteMatch,
}

/// Envoy route name for a rule match
pub fn route_name(route: &HttpRoute, rule_index: usize, match_index: usize) -> String {
    format!(
        "{}-{}-rule-{}-match-{}",
        route.metadata.namespace(),
        route.metadata.name,
        rule_index,
        match_index
    )
}

/// Translate all rules of `route` in the context of one parent reference
pub fn translate_route_rules(
    queries: &GatewayQueries<'_>,
    route: &HttpRoute,
    report: &mut ParentRefReport,
) -> Vec<SortableRoute> {
    let mut translated = Vec::new();
    for (rule_index, rule) in route.spec.rules.iter().enumerate() {
        let action = rule_action(queries, route, rule, report);
        let matches = if rule.matches.is_empty() {
            vec![HttpRouteMatch::catch_all()]
        } else {
            rule.matches.clone()
        };

        for (match_index, route_match) in matches.into_iter().enumerate() {
            if let Err(message) = validate_regexes(&route_match) {
                debug!(
                    route = %route.metadata.namespaced_name(),
                    rule = rule_index,
                    error = %message,
                    "Dropping match with invalid regular expression"
                );
                report.set_condition(
                    types::ACCEPTED,
                    ConditionStatus::False,
                    reasons::UNSUPPORTED_VALUE,
                    message,
                );
                continue;
            }

            let mut envoy_route = Route {
                name: route_name(route, rule_index, match_index),
                r#match: Some(translate_match(&route_match)),
                action: Some(action.clone()),
                ..Default::default()
            };
            apply_header_filters(rule, &mut envoy_route);

            translated.push(SortableRoute {
                route: envoy_route,
                namespace: route.metadata.namespace().to_string(),
                name: route.metadata.name.clone(),
                rule_index,
                match_index,
                route_match,
            });
        }
    }
    translated
}

fn translate_match(route_match: &HttpRouteMatch) -> RouteMatch {
    let path = route_match.path_or_default();
    let path_specifier = match path.type_ {
        PathMatchType::Exact => PathSpecifier::Path(path.value),
        PathMatchType::PathPrefix if path.value == "/" => PathSpecifier::Prefix(path.value),
        PathMatchType::PathPrefix => {
            PathSpecifier::PathSeparatedPrefix(path.value.trim_end_matches('/').to_string())
        }
        PathMatchType::RegularExpression => PathSpecifier::SafeRegex(regex_matcher(path.value)),
    };

    let mut headers: Vec<HeaderMatcher> = route_match
        .headers
        .iter()
        .map(|header| HeaderMatcher {
            name: header.name.clone(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(string_matcher(
                header.type_,
                &header.value,
            ))),
            ..Default::default()
        })
        .collect();
    if let Some(method) = &route_match.method {
        headers.push(HeaderMatcher {
            name: ":method".to_string(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(string_matcher(
                HeaderMatchType::Exact,
                method,
            ))),
            ..Default::default()
        });
    }

    let query_parameters = route_match
        .query_params
        .iter()
        .map(|query| QueryParameterMatcher {
            name: query.name.clone(),
            query_parameter_match_specifier: Some(QueryParameterMatchSpecifier::StringMatch(
                string_matcher(query.type_, &query.value),
            )),
            ..Default::default()
        })
        .collect();

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers,
        query_parameters,
        ..Default::default()
    }
}

/// Every regular expression in `route_match` must compile before it reaches Envoy
fn validate_regexes(route_match: &HttpRouteMatch) -> Result<(), String> {
    let mut patterns = Vec::new();
    if let Some(path) = &route_match.path {
        if path.type_ == PathMatchType::RegularExpression {
            patterns.push(("path", path.value.as_str()));
        }
    }
    for header in &route_match.headers {
        if header.type_ == HeaderMatchType::RegularExpression {
            patterns.push(("header", header.value.as_str()));
        }
    }
    for query in &route_match.query_params {
        if query.type_ == HeaderMatchType::RegularExpression {
            patterns.push(("query parameter", query.value.as_str()));
        }
    }

    for (field, pattern) in patterns {
        Regex::new(pattern)
            .map_err(|e| format!("invalid {field} regular expression {pattern:?}: {e}"))?;
    }
    Ok(())
}

fn regex_matcher(pattern: impl Into<String>) -> RegexMatcher {
    RegexMatcher { regex: pattern.into(), ..Default::default() }
}

fn string_matcher(match_type: HeaderMatchType, value: &str) -> StringMatcher {
    let pattern = match match_type {
        HeaderMatchType::Exact => MatchPattern::Exact(value.to_string()),
        HeaderMatchType::RegularExpression => MatchPattern::SafeRegex(regex_matcher(value)),
    };
    StringMatcher { match_pattern: Some(pattern), ..Default::default() }
}

fn rule_action(
    queries: &GatewayQueries<'_>,
    route: &HttpRoute,
    rule: &HttpRouteRule,
    report: &mut ParentRefReport,
) -> Action {
    let redirect = rule
        .filters
        .iter()
        .filter(|f| f.type_ == HttpRouteFilterType::RequestRedirect)
        .find_map(|f| f.request_redirect.as_ref());
    if let Some(redirect) = redirect {
        return Action::Redirect(redirect_action(redirect));
    }

    let clusters = resolve_backends(queries, route, &rule.backend_refs, report);
    if clusters.is_empty() {
        return direct_response(500, NO_VALID_BACKENDS_BODY);
    }
    let cluster_specifier = if clusters.len() == 1 {
        ClusterSpecifier::Cluster(clusters[0].0.clone())
    } else {
        ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters: clusters
                .into_iter()
                .map(|(name, weight)| ClusterWeight {
                    name,
                    weight: Some(UInt32Value { value: weight }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    };

    #[allow(deprecated)]
    let mut action =
        RouteAction { cluster_specifier: Some(cluster_specifier), ..Default::default() };

    let rewrite = rule
        .filters
        .iter()
        .filter(|f| f.type_ == HttpRouteFilterType::UrlRewrite)
        .find_map(|f| f.url_rewrite.as_ref());
    if let Some(rewrite) = rewrite {
        apply_url_rewrite(rewrite, &mut action);
    }

    Action::Route(action)
}

/// Resolve backend refs to `(cluster name, weight)` pairs
fn resolve_backends(
    queries: &GatewayQueries<'_>,
    route: &HttpRoute,
    backends: &[BackendRef],
    report: &mut ParentRefReport,
) -> Vec<(String, u32)> {
    let from = FromObject::new(GroupKind::http_route(), &route.metadata);
    let mut clusters = Vec::new();

    for backend in backends {
        let weight = backend.weight_or_default();
        let service = match queries.resolve_backend(&from, backend) {
            Ok(service) => service,
            Err(err) => {
                debug!(route = %route.metadata.namespaced_name(), backend = %backend.name, error = %err, "Backend not resolved");
                report.set_condition(
                    types::RESOLVED_REFS,
                    ConditionStatus::False,
                    err.route_reason(),
                    err.to_string(),
                );
                continue;
            }
        };

        let port = backend
            .port
            .filter(|port| service.spec.ports.iter().any(|p| p.port == *port));
        let Some(port) = port else {
            let err = QueryError::NotFound {
                kind: GroupKind::service(),
                name: service.metadata.namespaced_name(),
            };
            report.set_condition(
                types::RESOLVED_REFS,
                ConditionStatus::False,
                reasons::BACKEND_NOT_FOUND,
                format!("{err}: port {:?} not exposed", backend.port),
            );
            continue;
        };

        if weight == 0 {
            continue;
        }
        clusters.push((
            cluster_name(service.metadata.namespace(), &service.metadata.name, port),
            weight,
        ));
    }
    clusters
}

fn direct_response(status: u32, body: &str) -> Action {
    Action::DirectResponse(DirectResponseAction {
        status,
        body: Some(DataSource {
            specifier: Some(data_source::Specifier::InlineString(body.to_string())),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn redirect_action(redirect: &HttpRequestRedirectFilter) -> RedirectAction {
    let response_code = match redirect.status_code {
        Some(301) => RedirectResponseCode::MovedPermanently,
        Some(303) => RedirectResponseCode::SeeOther,
        Some(307) => RedirectResponseCode::TemporaryRedirect,
        Some(308) => RedirectResponseCode::PermanentRedirect,
        _ => RedirectResponseCode::Found,
    };

    RedirectAction {
        scheme_rewrite_specifier: redirect
            .scheme
            .clone()
            .map(SchemeRewriteSpecifier::SchemeRedirect),
        host_redirect: redirect.hostname.clone().unwrap_or_default(),
        port_redirect: redirect.port.map(u32::from).unwrap_or_default(),
        path_rewrite_specifier: redirect.path.as_ref().and_then(redirect_path),
        response_code: response_code as i32,
        ..Default::default()
    }
}

fn redirect_path(path: &HttpPathModifier) -> Option<PathRewriteSpecifier> {
    match path.type_ {
        PathModifierType::ReplaceFullPath => {
            path.replace_full_path.clone().map(PathRewriteSpecifier::PathRedirect)
        }
        PathModifierType::ReplacePrefixMatch => {
            path.replace_prefix_match.clone().map(PathRewriteSpecifier::PrefixRewrite)
        }
    }
}

fn apply_url_rewrite(rewrite: &HttpUrlRewriteFilter, action: &mut RouteAction) {
    if let Some(hostname) = &rewrite.hostname {
        action.host_rewrite_specifier = Some(HostRewriteSpecifier::HostRewriteLiteral(hostname.clone()));
    }
    let Some(path) = &rewrite.path else {
        return;
    };
    match path.type_ {
        PathModifierType::ReplacePrefixMatch => {
            if let Some(prefix) = &path.replace_prefix_match {
                action.prefix_rewrite = prefix.clone();
            }
        }
        PathModifierType::ReplaceFullPath => {
            if let Some(full) = &path.replace_full_path {
                action.regex_rewrite = Some(RegexMatchAndSubstitute {
                    pattern: Some(regex_matcher("^/.*$")),
                    substitution: full.clone(),
                });
            }
        }
    }
}

fn header_options(filter: &HttpHeaderFilter) -> Vec<HeaderValueOption> {
    let option = |name: &str, value: &str, action: HeaderAppendAction| HeaderValueOption {
        header: Some(HeaderValue {
            key: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }),
        append_action: action as i32,
        ..Default::default()
    };

    filter
        .set
        .iter()
        .map(|h| option(&h.name, &h.value, HeaderAppendAction::OverwriteIfExistsOrAdd))
        .chain(
            filter
                .add
                .iter()
                .map(|h| option(&h.name, &h.value, HeaderAppendAction::AppendIfExistsOrAdd)),
        )
        .collect()
}

fn apply_header_filters(rule: &HttpRouteRule, route: &mut Route) {
    for filter in &rule.filters {
        match filter.type_ {
            HttpRouteFilterType::RequestHeaderModifier => {
                if let Some(modifier) = &filter.request_header_modifier {
                    route.request_headers_to_add.extend(header_options(modifier));
                    route.request_headers_to_remove.extend(modifier.remove.iter().cloned());
                }
            }
            HttpRouteFilterType::ResponseHeaderModifier => {
                if let Some(modifier) = &filter.response_header_modifier {
                    route.response_headers_to_add.extend(header_options(modifier));
                    route.response_headers_to_remove.extend(modifier.remove.iter().cloned());
                }
            }
            HttpRouteFilterType::RequestRedirect | HttpRouteFilterType::UrlRewrite => {}
            HttpRouteFilterType::Unsupported => {
                debug!(route = %route.name, "Ignoring unsupported route filter");
            }
        }
    }
}
