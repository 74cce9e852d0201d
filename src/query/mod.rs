//! # Gateway Queries
//!
//! Read-only lookups over a point-in-time [`ObjectIndex`]: reference
//! resolution under the ReferenceGrant model and route-to-listener matching.
//! Nothing here writes; failures come back as [`QueryError`] values that the
//! translator turns into status conditions.

pub mod hostnames;
pub mod reference;
pub mod routes;

pub use hostnames::hostname_intersect;
pub use reference::{reference_allowed, FromObject};
pub use routes::{
    route_kinds_for_listener, ListenerResult, MatchedRoute, RouteError, RoutesForGatewayResult,
};

use crate::domain::{condition::reasons, GroupKind, NamespacedName};
use crate::storage::ObjectIndex;

/// Typed query failures, each mapping to one status reason
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("missing reference grant")]
    MissingReferenceGrant,

    #[error("{kind} {name} not found")]
    NotFound { kind: GroupKind, name: NamespacedName },

    #[error("unknown reference kind {0}")]
    UnknownKind(GroupKind),

    #[error("no matching parent")]
    NoMatchingParent,

    #[error("no matching listener hostname")]
    NoMatchingListenerHostname,

    #[error("not allowed by listeners")]
    NotAllowedByListeners,

    #[error("selector must be set")]
    SelectorNotSet,
}

impl QueryError {
    /// Condition reason for this failure on a route parent
    pub fn route_reason(&self) -> &'static str {
        match self {
            QueryError::MissingReferenceGrant => reasons::REF_NOT_PERMITTED,
            QueryError::NotFound { .. } => reasons::BACKEND_NOT_FOUND,
            QueryError::UnknownKind(_) => reasons::INVALID_KIND,
            QueryError::NoMatchingParent => reasons::NO_MATCHING_PARENT,
            QueryError::NoMatchingListenerHostname => reasons::NO_MATCHING_LISTENER_HOSTNAME,
            QueryError::NotAllowedByListeners | QueryError::SelectorNotSet => {
                reasons::NOT_ALLOWED_BY_LISTENERS
            }
        }
    }
}

/// Query entry point bound to one object index
#[derive(Debug, Clone, Copy)]
pub struct GatewayQueries<'a> {
    index: &'a ObjectIndex,
}

impl<'a> GatewayQueries<'a> {
    pub fn new(index: &'a ObjectIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &'a ObjectIndex {
        self.index
    }
}
