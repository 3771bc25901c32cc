//! Config value builders
//!
//! Pure functions turning a cluster, its provider facts and the operator
//! configuration into the values documents consumed by the platform agent and
//! by the workload charts. Field names are part of the chart contract and are
//! serialized exactly as spelled here.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{OperatorConfig, ProxyConfig};
use crate::crd::{Cluster, ClusterSpec};
use crate::error::{Error, Result};

use super::keys;
use super::provider::{ProviderFacts, ProviderKind};

/// Key under which every values document is stored in its ConfigMap or Secret
pub const VALUES_KEY: &str = "values";

const API_SERVER_POD_PORT: i32 = 6443;
const DNS_LAST_OCTET: u8 = 10;
const NO_PROXY_SUFFIX: &str = "svc,127.0.0.1,localhost";

/// DNS service IP for a service CIDR: the 10th host of an IPv4 network
/// address, e.g. `172.16.0.0/16` gives `172.16.0.10`.
pub fn dns_ip(service_cidr: &str) -> Result<String> {
    let invalid = || Error::ValidationError(format!("invalid service CIDR {service_cidr:?}"));

    let (addr, prefix) = service_cidr.trim().split_once('/').ok_or_else(invalid)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;

    let [a, b, c, d] = addr.octets();
    if d != 0 {
        return Err(Error::ValidationError(format!(
            "service CIDR {service_cidr} is not a network address"
        )));
    }
    Ok(Ipv4Addr::new(a, b, c, DNS_LAST_OCTET).to_string())
}

/// Explicit service subnet of a kubeadm-style control plane object
pub fn control_plane_service_subnet(control_plane: &Value) -> Option<&str> {
    control_plane
        .pointer("/spec/kubeadmConfigSpec/clusterConfiguration/networking/serviceSubnet")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Hosts that must bypass the proxy inside the workload cluster.
pub fn no_proxy(spec: &ClusterSpec, global_no_proxy: &str) -> String {
    let domain = [spec.service_domain()];
    let tail = [spec.control_plane_host(), global_no_proxy, NO_PROXY_SUFFIX];

    domain
        .into_iter()
        .chain(spec.service_cidr_blocks().iter().map(String::as_str))
        .chain(spec.pod_cidr_blocks().iter().map(String::as_str))
        .chain(tail)
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Provider name written into values. Resolved facts win over the
/// management cluster default.
fn provider_name(facts: &ProviderFacts, config: &OperatorConfig) -> String {
    if facts.kind == ProviderKind::Unknown && !config.provider.is_empty() {
        config.provider.clone()
    } else {
        facts.kind.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAgentValues {
    pub app: PlatformAgentApp,
    pub provider: PlatformAgentProvider,
    pub registry: Registry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformAgentApp {
    pub watch_namespace: String,
    #[serde(rename = "workloadClusterID")]
    pub workload_cluster_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAgentProvider {
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub domain: String,
}

pub fn build_platform_agent_values(
    cluster: &Cluster,
    facts: &ProviderFacts,
    config: &OperatorConfig,
) -> PlatformAgentValues {
    PlatformAgentValues {
        app: PlatformAgentApp {
            watch_namespace: keys::cluster_namespace(cluster),
            workload_cluster_id: keys::cluster_id(cluster),
        },
        provider: PlatformAgentProvider {
            kind: provider_name(facts, config),
        },
        registry: Registry {
            domain: config.registry_domain.clone(),
        },
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterValues {
    pub base_domain: String,
    pub bootstrap_mode: BootstrapMode,
    pub chart_operator: ChartOperatorValues,
    pub cluster: ClusterSection,
    #[serde(rename = "clusterCA")]
    pub cluster_ca: String,
    #[serde(rename = "clusterDNSIP")]
    pub cluster_dns_ip: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    #[serde(rename = "clusterCIDR")]
    pub cluster_cidr: String,
    /// `Some("")` tells consumers not to probe external DNS
    #[serde(rename = "externalDNSIP", default, skip_serializing_if = "Option::is_none")]
    pub external_dns_ip: Option<String>,
    pub provider: String,
    pub gcp_project: String,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapMode {
    pub enabled: bool,
    pub api_server_pod_port: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartOperatorValues {
    pub cni: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub calico: BTreeMap<String, String>,
    pub kubernetes: KubernetesSection,
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyValues>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesSection {
    #[serde(rename = "API")]
    pub api: BTreeMap<String, String>,
    #[serde(rename = "DNS")]
    pub dns: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyValues {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

pub fn build_cluster_values(
    cluster: &Cluster,
    facts: &ProviderFacts,
    config: &OperatorConfig,
    pod_cidr: &str,
    cluster_ca: &str,
    dns_ip: &str,
) -> ClusterValues {
    let cluster_id = keys::cluster_id(cluster);
    let managed = cluster.spec.is_managed_aws();

    let proxy = (!config.proxy.is_empty()).then(|| ProxyValues {
        http_proxy: config.proxy.http_proxy.clone(),
        https_proxy: config.proxy.https_proxy.clone(),
        no_proxy: no_proxy(&cluster.spec, &config.proxy.no_proxy),
    });

    let (gcp_project, subscription_id) = match facts.kind {
        ProviderKind::Gcp => (facts.project.clone(), String::new()),
        ProviderKind::Azure => (String::new(), facts.project.clone()),
        _ => (String::new(), String::new()),
    };

    ClusterValues {
        base_domain: keys::base_domain(&cluster_id, &config.base_domain),
        bootstrap_mode: BootstrapMode {
            enabled: !managed,
            api_server_pod_port: API_SERVER_POD_PORT,
        },
        chart_operator: ChartOperatorValues {
            cni: BTreeMap::from([("install".to_string(), !managed)]),
        },
        cluster: ClusterSection {
            calico: BTreeMap::from([("CIDR".to_string(), pod_cidr.to_string())]),
            kubernetes: KubernetesSection {
                api: BTreeMap::from([(
                    "clusterIPRange".to_string(),
                    config.cluster_ip_range.clone(),
                )]),
                dns: BTreeMap::from([("IP".to_string(), dns_ip.to_string())]),
            },
            private: facts.is_private,
            proxy,
        },
        cluster_ca: cluster_ca.to_string(),
        cluster_dns_ip: dns_ip.to_string(),
        cluster_id,
        cluster_cidr: facts.network_cidr.clone(),
        external_dns_ip: facts.is_private.then(String::new),
        provider: provider_name(facts, config),
        gcp_project,
        subscription_id,
    }
}

/// Whether the cluster-values Secret carries the proxy settings. On-premises
/// providers are private whenever the management cluster runs behind a proxy.
pub fn needs_proxy_secret(facts: &ProviderFacts, proxy: &ProxyConfig) -> bool {
    !proxy.is_empty() && (facts.is_private || facts.requires_proxy)
}

/// Proxy entries of the cluster-values Secret, spelled the way the upstream
/// charts consuming them expect.
pub fn proxy_secret_values(spec: &ClusterSpec, proxy: &ProxyConfig) -> Value {
    let no_proxy = no_proxy(spec, &proxy.no_proxy);
    json!({
        "no_proxy": no_proxy,
        "http_proxy": proxy.http_proxy,
        "https_proxy": proxy.https_proxy,
        "cluster": {
            "proxy": {
                "noProxy": no_proxy,
                "http": proxy.http_proxy,
                "https": proxy.https_proxy,
            }
        },
        "env": [
            { "name": "NO_PROXY", "value": no_proxy },
            { "name": "HTTP_PROXY", "value": proxy.http_proxy },
            { "name": "HTTPS_PROXY", "value": proxy.https_proxy },
        ],
    })
}

#[derive(Debug, Default, Deserialize)]
struct OpenStackClouds {
    #[serde(default)]
    clouds: BTreeMap<String, OpenStackCloud>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenStackCloud {
    #[serde(default)]
    auth: OpenStackAuth,
    #[serde(default)]
    region_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenStackAuth {
    #[serde(default)]
    auth_url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    user_domain_name: String,
    #[serde(default)]
    project_id: String,
}

/// Cloud provider credentials and network IDs for the OpenStack cloud
/// controller, from the `clouds.yaml` of the cluster identity secret.
pub fn openstack_secret_values(facts: &ProviderFacts, clouds_yaml: &[u8]) -> Result<Value> {
    let clouds: OpenStackClouds = serde_yaml::from_slice(clouds_yaml)?;
    let cloud = clouds.clouds.get("openstack").ok_or_else(|| {
        Error::ValidationError("clouds.yaml has no \"openstack\" cloud".to_string())
    })?;

    let public_network_name = facts
        .object
        .as_ref()
        .and_then(|obj| obj.pointer("/status/externalNetwork/name"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(json!({
        "global": {
            "auth-url": cloud.auth.auth_url,
            "username": cloud.auth.username,
            "password": cloud.auth.password,
            "tenant-id": cloud.auth.project_id,
            "domain-name": cloud.auth.user_domain_name,
            "region": cloud.region_name,
        },
        "networking": {
            "ipv6-support-disabled": true,
            "public-network-name": public_network_name,
        },
        "loadBalancer": {
            "internal-lb": false,
            "floating-network-id": facts.external_network_id,
            "network-id": facts.network_id,
            "subnet-id": facts.subnet_id,
        },
    }))
}

/// VCD credentials and site configuration for the cloud director CPI.
pub fn cloud_director_secret_values(vcd_cluster: &Value, refresh_token: &str) -> Value {
    let field = |pointer: &str| {
        vcd_cluster
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    json!({
        "basicAuthSecret": { "refreshToken": refresh_token },
        "vcdConfig": {
            "site": field("/spec/site"),
            "org": field("/spec/org"),
            "ovdc": field("/spec/ovdc"),
            "ovdcNetwork": field("/spec/ovdcNetwork"),
            "vipSubnet": field("/spec/loadBalancerConfigSpec/vipSubnet"),
            "clusterid": field("/spec/rdeId"),
            "vAppName": field("/metadata/name"),
        },
    })
}
