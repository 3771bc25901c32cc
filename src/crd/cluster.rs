//! Cluster API `Cluster` resource
//!
//! Only the fields this operator reads are modelled. The resource is owned by
//! Cluster API; the operator never writes to it apart from its finalizer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ObjectReference;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<NetworkRanges>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<NetworkRanges>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_domain: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub infrastructure_ready: bool,

    #[serde(default)]
    pub control_plane_ready: bool,
}

impl ClusterSpec {
    pub fn service_cidr_blocks(&self) -> &[String] {
        self.cluster_network
            .as_ref()
            .and_then(|n| n.services.as_ref())
            .map(|r| r.cidr_blocks.as_slice())
            .unwrap_or_default()
    }

    pub fn pod_cidr_blocks(&self) -> &[String] {
        self.cluster_network
            .as_ref()
            .and_then(|n| n.pods.as_ref())
            .map(|r| r.cidr_blocks.as_slice())
            .unwrap_or_default()
    }

    pub fn service_domain(&self) -> &str {
        self.cluster_network
            .as_ref()
            .map(|n| n.service_domain.as_str())
            .unwrap_or_default()
    }

    pub fn control_plane_host(&self) -> &str {
        self.control_plane_endpoint
            .as_ref()
            .map(|e| e.host.as_str())
            .unwrap_or_default()
    }

    /// EKS-style clusters run a managed control plane that brings its own
    /// CNI, DNS and kube-proxy.
    pub fn is_managed_aws(&self) -> bool {
        let control_plane = self
            .control_plane_ref
            .as_ref()
            .is_some_and(|r| r.kind == "AWSManagedControlPlane");
        let infrastructure = self
            .infrastructure_ref
            .as_ref()
            .is_some_and(|r| r.kind == "AWSManagedCluster");
        control_plane && infrastructure
    }
}
