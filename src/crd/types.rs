//! Shared types used across the resource definitions
//!
//! - [`ObjectReference`] - a typed pointer from a `Cluster` to its control
//!   plane or infrastructure object
//! - [`NamespacedName`] - the name/namespace pair `App` resources use to
//!   reference ConfigMaps, Secrets and kubeconfigs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another object, as carried by `Cluster.spec.infrastructureRef`
/// and `Cluster.spec.controlPlaneRef`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Namespace of the referenced object, defaulting to the referrer's.
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => fallback,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl NamespacedName {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
