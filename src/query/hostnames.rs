//! Listener/route hostname intersection

/// Intersect a listener hostname with a route's hostnames.
///
/// `None` means the two do not intersect. `Some(vec![])` means both sides are
/// catch-all and the route applies to every host.
pub fn hostname_intersect(
    listener_hostname: Option<&str>,
    route_hostnames: &[String],
) -> Option<Vec<String>> {
    let listener_hostname = match listener_hostname.filter(|h| !h.is_empty()) {
        Some(hostname) => hostname,
        None => return Some(route_hostnames.to_vec()),
    };

    if route_hostnames.is_empty() {
        return Some(vec![listener_hostname.to_string()]);
    }

    if let Some(suffix) = listener_hostname.strip_prefix('*') {
        let matched: Vec<String> =
            route_hostnames.iter().filter(|host| host.ends_with(suffix)).cloned().collect();
        return (!matched.is_empty()).then_some(matched);
    }

    let intersects = route_hostnames.iter().any(|host| {
        host == listener_hostname
            || host
                .strip_prefix('*')
                .is_some_and(|suffix| suffix.starts_with('.') && listener_hostname.ends_with(suffix))
    });
    intersects.then(|| vec![listener_hostname.to_string()])
}
