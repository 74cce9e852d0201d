//! Object identity and selection
//!
//! Shared metadata types: namespaced names, API group/kind pairs and the
//! label selectors used by `AllowedRoutes.namespaces.selector`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group of the Gateway API resources
pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";
/// The core Kubernetes API group, spelled as the empty string
pub const CORE_GROUP: &str = "";

pub const GATEWAY_KIND: &str = "Gateway";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";
pub const SERVICE_KIND: &str = "Service";
pub const SECRET_KIND: &str = "Secret";

/// The namespace assumed for objects that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Standard object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub generation: i64,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), ..Default::default() }
    }

    /// The object's namespace, falling back to `default` when unset
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace(), &self.name)
    }
}

/// `namespace/name` identity of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An API group and kind pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }

    pub fn gateway() -> Self {
        Self::new(GATEWAY_GROUP, GATEWAY_KIND)
    }

    pub fn http_route() -> Self {
        Self::new(GATEWAY_GROUP, HTTP_ROUTE_KIND)
    }

    pub fn service() -> Self {
        Self::new(CORE_GROUP, SERVICE_KIND)
    }

    pub fn secret() -> Self {
        Self::new(CORE_GROUP, SECRET_KIND)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "core/{}", self.kind)
        } else {
            write!(f, "{}/{}", self.group, self.kind)
        }
    }
}

/// The core group may be written as `""` or `"core"`; both mean the same thing.
pub fn core_if_empty(group: &str) -> &str {
    if group.is_empty() {
        "core"
    } else {
        group
    }
}

/// Kubernetes label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelector {
    /// Whether `labels` satisfy every label and expression of this selector.
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match =
            self.match_labels.iter().all(|(key, value)| labels.get(key) == Some(value));

        labels_match
            && self.match_expressions.iter().all(|req| {
                let value = labels.get(&req.key);
                match req.operator {
                    LabelSelectorOperator::In => value.is_some_and(|v| req.values.contains(v)),
                    LabelSelectorOperator::NotIn => !value.is_some_and(|v| req.values.contains(v)),
                    LabelSelectorOperator::Exists => value.is_some(),
                    LabelSelectorOperator::DoesNotExist => value.is_none(),
                }
            })
    }
}
