//! Provider strategy resolution
//!
//! A cluster's infrastructure reference kind selects one [`ProviderKind`].
//! Each fact about the provider object is extracted by its own function so a
//! missing field fails only the fact that needs it. Unknown kinds are not an
//! error: they resolve to default facts and the values fall back to the
//! operator configuration.

use serde_json::Value;
use tracing::debug;

use crate::crd::Cluster;
use crate::error::{Error, Result};

use super::keys;
use super::store::AppStore;

const AWS_VPC_MODE_ANNOTATION: &str = "aws.giantswarm.io/vpc-mode";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Azure,
    Aws,
    Gcp,
    OpenStack,
    VSphere,
    CloudDirector,
    #[default]
    Unknown,
}

impl ProviderKind {
    pub fn from_infrastructure_kind(kind: &str) -> Self {
        match kind {
            "AzureCluster" | "AzureManagedCluster" => Self::Azure,
            "AWSCluster" | "AWSManagedCluster" => Self::Aws,
            "GCPCluster" | "GCPManagedCluster" => Self::Gcp,
            "OpenStackCluster" => Self::OpenStack,
            "VSphereCluster" => Self::VSphere,
            "VCDCluster" => Self::CloudDirector,
            _ => Self::Unknown,
        }
    }

    /// Name written into values documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::OpenStack => "openstack",
            Self::VSphere => "vsphere",
            Self::CloudDirector => "cloud-director",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderFacts {
    pub kind: ProviderKind,
    pub network_cidr: String,
    pub network_id: String,
    pub subnet_id: String,
    pub external_network_id: String,
    pub region: String,
    pub project: String,
    pub is_private: bool,
    pub requires_proxy: bool,
    /// The fetched provider object, for callers needing provider-specific
    /// fields beyond the facts above
    pub object: Option<Value>,
}

fn lookup<'a>(obj: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(obj, |node, segment| node.get(segment))
}

fn str_at(obj: &Value, path: &[&str]) -> String {
    lookup(obj, path)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn first_str_at(obj: &Value, path: &[&str]) -> String {
    lookup(obj, path)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn missing(kind: ProviderKind, field: &str) -> Error {
    Error::ValidationError(format!("field {field} not found on {kind} infrastructure object"))
}

pub fn network_cidr(kind: ProviderKind, obj: &Value) -> Result<String> {
    Ok(match kind {
        ProviderKind::Azure => first_str_at(obj, &["spec", "networkSpec", "vnet", "cidrBlocks"]),
        ProviderKind::Aws => str_at(obj, &["spec", "network", "vpc", "cidrBlock"]),
        ProviderKind::OpenStack => str_at(obj, &["spec", "nodeCidr"]),
        _ => String::new(),
    })
}

pub fn network_id(kind: ProviderKind, obj: &Value) -> Result<String> {
    Ok(match kind {
        ProviderKind::Azure => str_at(obj, &["spec", "networkSpec", "vnet", "name"]),
        ProviderKind::Aws => str_at(obj, &["spec", "network", "vpc", "id"]),
        ProviderKind::Gcp => str_at(obj, &["spec", "network", "name"]),
        ProviderKind::OpenStack => str_at(obj, &["status", "network", "id"]),
        ProviderKind::CloudDirector => str_at(obj, &["spec", "ovdcNetwork"]),
        _ => String::new(),
    })
}

pub fn subnet_id(kind: ProviderKind, obj: &Value) -> Result<String> {
    Ok(match kind {
        ProviderKind::OpenStack => {
            let listed = lookup(obj, &["status", "network", "subnets"])
                .and_then(Value::as_array)
                .and_then(|subnets| subnets.first())
                .map(|subnet| str_at(subnet, &["id"]))
                .unwrap_or_default();
            if listed.is_empty() {
                str_at(obj, &["status", "network", "subnet", "id"])
            } else {
                listed
            }
        }
        ProviderKind::Azure => lookup(obj, &["spec", "networkSpec", "subnets"])
            .and_then(Value::as_array)
            .and_then(|subnets| subnets.first())
            .map(|subnet| str_at(subnet, &["name"]))
            .unwrap_or_default(),
        _ => String::new(),
    })
}

pub fn external_network_id(kind: ProviderKind, obj: &Value) -> Result<String> {
    Ok(match kind {
        ProviderKind::OpenStack => str_at(obj, &["status", "externalNetwork", "id"]),
        _ => String::new(),
    })
}

pub fn region(kind: ProviderKind, obj: &Value) -> Result<String> {
    Ok(match kind {
        ProviderKind::Azure => str_at(obj, &["spec", "location"]),
        ProviderKind::Aws | ProviderKind::Gcp => str_at(obj, &["spec", "region"]),
        ProviderKind::CloudDirector => str_at(obj, &["spec", "site"]),
        _ => String::new(),
    })
}

pub fn project(kind: ProviderKind, obj: &Value) -> Result<String> {
    match kind {
        ProviderKind::Gcp => {
            let project = str_at(obj, &["spec", "project"]);
            if project.is_empty() {
                return Err(missing(kind, "spec.project"));
            }
            Ok(project)
        }
        ProviderKind::Azure => Ok(str_at(obj, &["spec", "subscriptionID"])),
        ProviderKind::CloudDirector => Ok(str_at(obj, &["spec", "org"])),
        _ => Ok(String::new()),
    }
}

pub fn is_private(kind: ProviderKind, obj: &Value) -> Result<bool> {
    match kind {
        ProviderKind::Azure => {
            let lb_type = lookup(obj, &["spec", "networkSpec", "apiServerLB", "type"])
                .and_then(Value::as_str)
                .ok_or_else(|| missing(kind, "spec.networkSpec.apiServerLB.type"))?;
            Ok(lb_type == "Internal")
        }
        ProviderKind::Aws => {
            let mode = lookup(obj, &["metadata", "annotations", AWS_VPC_MODE_ANNOTATION])
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(mode == "private")
        }
        _ => Ok(false),
    }
}

/// On-premises providers reach the internet only through the management
/// cluster proxy.
pub fn requires_proxy(kind: ProviderKind) -> bool {
    matches!(kind, ProviderKind::VSphere | ProviderKind::CloudDirector)
}

/// Fetches the cluster's infrastructure object and extracts its facts.
///
/// A missing provider object is reported as `Error::NotFound`; it is normal
/// early in a cluster's life and callers suspend on it.
pub async fn resolve(store: &dyn AppStore, cluster: &Cluster) -> Result<ProviderFacts> {
    let Some(infra) = cluster.spec.infrastructure_ref.as_ref() else {
        return Ok(ProviderFacts::default());
    };

    let kind = ProviderKind::from_infrastructure_kind(&infra.kind);
    if kind == ProviderKind::Unknown {
        debug!(
            "No provider strategy for infrastructure kind {}, using defaults",
            infra.kind
        );
        return Ok(ProviderFacts::default());
    }

    let cluster_namespace = keys::cluster_namespace(cluster);
    let namespace = infra.namespace_or(&cluster_namespace);
    let obj = match store
        .get_dynamic(&infra.api_version, &infra.kind, namespace, &infra.name)
        .await
    {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => return Err(Error::not_found(&infra.kind, &infra.name)),
        Err(e) => return Err(e),
    };

    Ok(ProviderFacts {
        kind,
        network_cidr: network_cidr(kind, &obj)?,
        network_id: network_id(kind, &obj)?,
        subnet_id: subnet_id(kind, &obj)?,
        external_network_id: external_network_id(kind, &obj)?,
        region: region(kind, &obj)?,
        project: project(kind, &obj)?,
        is_private: is_private(kind, &obj)?,
        requires_proxy: requires_proxy(kind),
        object: Some(obj),
    })
}
