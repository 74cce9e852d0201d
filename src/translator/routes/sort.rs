//! Route specificity ordering
//!
//! Envoy picks the first matching route, so routes inside a virtual host are
//! emitted most specific first.

use super::SortableRoute;
use crate::domain::{HttpHeaderMatch, PathMatchType};
use std::cmp::Ordering;

fn path_rank(path_type: PathMatchType) -> u8 {
    match path_type {
        PathMatchType::Exact => 2,
        PathMatchType::RegularExpression => 1,
        PathMatchType::PathPrefix => 0,
    }
}

fn sorted_pairs(matches: &[HttpHeaderMatch]) -> Vec<(&str, &str)> {
    let mut pairs: Vec<_> = matches.iter().map(|m| (m.name.as_str(), m.value.as_str())).collect();
    pairs.sort_unstable();
    pairs
}

/// `Less` when `a` must be tried before `b`
pub fn compare_specificity(a: &SortableRoute, b: &SortableRoute) -> Ordering {
    let a_path = a.route_match.path_or_default();
    let b_path = b.route_match.path_or_default();

    path_rank(b_path.type_)
        .cmp(&path_rank(a_path.type_))
        .then_with(|| {
            if a_path.type_ == PathMatchType::PathPrefix && b_path.type_ == PathMatchType::PathPrefix
            {
                b_path.value.len().cmp(&a_path.value.len())
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| b.route_match.method.is_some().cmp(&a.route_match.method.is_some()))
        .then_with(|| b.route_match.headers.len().cmp(&a.route_match.headers.len()))
        .then_with(|| b.route_match.query_params.len().cmp(&a.route_match.query_params.len()))
        .then_with(|| a.rule_index.cmp(&b.rule_index))
        .then_with(|| {
            let key = |r: &'_ SortableRoute| {
                (
                    r.namespace.clone(),
                    r.name.clone(),
                    r.match_index,
                    r.route_match.path_or_default().value,
                    r.route_match.method.clone(),
                )
            };
            key(a).cmp(&key(b))
        })
        .then_with(|| sorted_pairs(&a.route_match.headers).cmp(&sorted_pairs(&b.route_match.headers)))
        .then_with(|| {
            sorted_pairs(&a.route_match.query_params).cmp(&sorted_pairs(&b.route_match.query_params))
        })
}

/// Stable sort, most specific first
pub fn sort_routes(routes: &mut [SortableRoute]) {
    routes.sort_by(compare_specificity);
}
