//! `App` resource, the unit of application installation
//!
//! Apps are reconciled into Helm releases by the platform agent running for
//! the cluster. This operator creates, patches and deletes them but never
//! writes their status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::NamespacedName;

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "App",
    namespaced,
    printcolumn = r#"{"name":"Chart","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Catalog the chart is pulled from
    pub catalog: String,

    /// Chart name as it appears in the catalog index
    pub name: String,

    /// Namespace the chart is installed into
    pub namespace: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AppConfig>,

    #[serde(default)]
    pub kube_config: AppKubeConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<AppUserConfig>,
}

/// Operator-provided values
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NamespacedName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamespacedName>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppKubeConfig {
    #[serde(default)]
    pub in_cluster: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<KubeConfigContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamespacedName>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KubeConfigContext {
    pub name: String,
}

/// Values supplied by cluster users next to the App
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppUserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NamespacedName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamespacedName>,
}

impl AppUserConfig {
    pub fn is_empty(&self) -> bool {
        self.config_map.is_none() && self.secret.is_none()
    }
}
