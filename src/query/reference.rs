//! Reference resolution
//!
//! Same-namespace references resolve directly. Cross-namespace references
//! additionally need a ReferenceGrant in the target namespace whose `from`
//! admits the referrer and whose `to` admits the target.

use super::{GatewayQueries, QueryError};
use crate::domain::{
    core_if_empty, BackendRef, GroupKind, NamespacedName, ObjectMeta, ReferenceGrant, Secret,
    SecretObjectReference, Service, CORE_GROUP, SECRET_KIND,
};

/// The object a reference originates from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromObject {
    pub group_kind: GroupKind,
    pub namespace: String,
}

impl FromObject {
    pub fn new(group_kind: GroupKind, meta: &ObjectMeta) -> Self {
        Self { group_kind, namespace: meta.namespace().to_string() }
    }
}

/// Whether any of `grants` lets `from` reference `to_name` of kind `to_kind`
pub fn reference_allowed<'g>(
    grants: impl IntoIterator<Item = &'g ReferenceGrant>,
    from: &FromObject,
    to_kind: &GroupKind,
    to_name: &str,
) -> bool {
    grants.into_iter().any(|grant| {
        let from_ok = grant.spec.from.iter().any(|f| {
            f.namespace == from.namespace
                && core_if_empty(&f.group) == core_if_empty(&from.group_kind.group)
                && f.kind == from.group_kind.kind
        });
        let to_ok = grant.spec.to.iter().any(|t| {
            core_if_empty(&t.group) == core_if_empty(&to_kind.group)
                && t.kind == to_kind.kind
                && t.name.as_deref().map_or(true, |name| name.is_empty() || name == to_name)
        });
        from_ok && to_ok
    })
}

impl<'a> GatewayQueries<'a> {
    /// Resolve a route backend. Only core `Service` backends are understood.
    pub fn resolve_backend(
        &self,
        from: &FromObject,
        backend: &BackendRef,
    ) -> Result<&'a Service, QueryError> {
        let kind = GroupKind::new(backend.group_or_default(), backend.kind_or_default());
        if kind != GroupKind::service() {
            return Err(QueryError::UnknownKind(kind));
        }
        let name = self.check_reference(from, &kind, backend.namespace.as_deref(), &backend.name)?;
        self.index.service(&name).ok_or(QueryError::NotFound { kind, name })
    }

    /// Resolve a listener certificate reference
    pub fn resolve_secret(
        &self,
        from: &FromObject,
        secret_ref: &SecretObjectReference,
    ) -> Result<&'a Secret, QueryError> {
        let kind = GroupKind::new(
            secret_ref.group.as_deref().unwrap_or(CORE_GROUP),
            secret_ref.kind.as_deref().unwrap_or(SECRET_KIND),
        );
        if kind != GroupKind::secret() {
            return Err(QueryError::UnknownKind(kind));
        }
        let name =
            self.check_reference(from, &kind, secret_ref.namespace.as_deref(), &secret_ref.name)?;
        self.index.secret(&name).ok_or(QueryError::NotFound { kind, name })
    }

    /// Apply the grant check and return the target identity
    fn check_reference(
        &self,
        from: &FromObject,
        kind: &GroupKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<NamespacedName, QueryError> {
        let target_ns = namespace.filter(|ns| !ns.is_empty()).unwrap_or(&from.namespace);
        if target_ns != from.namespace
            && !reference_allowed(self.index.reference_grants_in(target_ns), from, kind, name)
        {
            return Err(QueryError::MissingReferenceGrant);
        }
        Ok(NamespacedName::new(target_ns, name))
    }
}
