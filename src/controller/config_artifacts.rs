//! Config artifacts: the values ConfigMaps and Secret Apps reference
//!
//! - `<id>-app-operator-values` ConfigMap for the platform agent
//! - `<id>-cluster-values` ConfigMap shared by the workload Apps
//! - `<id>-cluster-values` Secret with provider credentials and proxy settings

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::OperatorConfig;
use crate::crd::Cluster;
use crate::error::{Error, Result};

use super::keys;
use super::pod_cidr::PodCidrSource;
use super::provider::{self, ProviderFacts, ProviderKind};
use super::store::AppStore;
use super::values::{self, VALUES_KEY};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactsOutcome {
    Applied,
    /// An input is not available yet; retry on the next pass
    Suspended { reason: String },
}

fn artifact_metadata(name: String, namespace: &str, cluster_id: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(keys::managed_labels(cluster_id)),
        annotations: Some(BTreeMap::from([(
            keys::ANNOTATION_NOTES.to_string(),
            format!("DO NOT EDIT. Values managed by {}.", keys::PROJECT_NAME),
        )])),
        ..Default::default()
    }
}

fn values_config_map(name: String, namespace: &str, cluster_id: &str, yaml: String) -> ConfigMap {
    ConfigMap {
        metadata: artifact_metadata(name, namespace, cluster_id),
        data: Some(BTreeMap::from([(VALUES_KEY.to_string(), yaml)])),
        ..Default::default()
    }
}

/// Suspends the pass on a not-found signal, propagates anything else.
macro_rules! or_suspend {
    ($result:expr, $what:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) if e.is_not_found() => {
                let reason = format!("{} not available yet: {}", $what, e);
                debug!("{}", reason);
                return Ok(ArtifactsOutcome::Suspended { reason });
            }
            Err(e) => return Err(e),
        }
    };
}

/// Builds and applies the three config artifacts of a live cluster.
pub async fn ensure_created(
    store: &dyn AppStore,
    pod_cidrs: &dyn PodCidrSource,
    config: &OperatorConfig,
    cluster: &Cluster,
) -> Result<ArtifactsOutcome> {
    let cluster_id = keys::cluster_id(cluster);
    let namespace = keys::cluster_namespace(cluster);

    let pod_cidr = or_suspend!(pod_cidrs.pod_cidr(cluster).await, "pod CIDR");
    let facts = or_suspend!(provider::resolve(store, cluster).await, "provider object");
    let dns_ip = or_suspend!(
        cluster_dns_ip(store, cluster, config, &namespace).await,
        "control plane"
    );
    let cluster_ca = cluster_ca(store, &cluster_id, &namespace).await?;

    let agent_values = values::build_platform_agent_values(cluster, &facts, config);
    let cluster_values =
        values::build_cluster_values(cluster, &facts, config, &pod_cidr, &cluster_ca, &dns_ip);

    let config_maps = [
        values_config_map(
            keys::app_operator_values_name(&cluster_id),
            &namespace,
            &cluster_id,
            serde_yaml::to_string(&agent_values)?,
        ),
        values_config_map(
            keys::cluster_values_name(&cluster_id),
            &namespace,
            &cluster_id,
            serde_yaml::to_string(&cluster_values)?,
        ),
    ];

    let secret_values = secret_values(store, cluster, config, &facts, &namespace).await?;
    let secret = Secret {
        metadata: artifact_metadata(keys::cluster_values_name(&cluster_id), &namespace, &cluster_id),
        data: Some(BTreeMap::from([(
            VALUES_KEY.to_string(),
            ByteString(serde_yaml::to_string(&secret_values)?.into_bytes()),
        )])),
        ..Default::default()
    };

    for config_map in &config_maps {
        store.apply_config_map(config_map).await?;
    }
    store.apply_secret(&secret).await?;

    info!(
        "Applied config artifacts for cluster {} in namespace {}",
        cluster_id, namespace
    );
    Ok(ArtifactsOutcome::Applied)
}

/// Removes the config artifacts. Already-missing objects are fine.
pub async fn ensure_deleted(store: &dyn AppStore, cluster_id: &str, namespace: &str) -> Result<()> {
    for name in [
        keys::app_operator_values_name(cluster_id),
        keys::cluster_values_name(cluster_id),
    ] {
        match store.delete_config_map(namespace, &name).await {
            Ok(()) => info!("Deleted ConfigMap {}/{}", namespace, name),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    let secret = keys::cluster_values_name(cluster_id);
    match store.delete_secret(namespace, &secret).await {
        Ok(()) => info!("Deleted Secret {}/{}", namespace, secret),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Configured DNS IP, unless the control plane pins its own service subnet.
async fn cluster_dns_ip(
    store: &dyn AppStore,
    cluster: &Cluster,
    config: &OperatorConfig,
    namespace: &str,
) -> Result<String> {
    let Some(control_plane) = cluster.spec.control_plane_ref.as_ref() else {
        return Ok(config.dns_ip.clone());
    };

    let obj = store
        .get_dynamic(
            &control_plane.api_version,
            &control_plane.kind,
            control_plane.namespace_or(namespace),
            &control_plane.name,
        )
        .await?;

    match values::control_plane_service_subnet(&obj) {
        Some(subnet) => values::dns_ip(subnet),
        None => Ok(config.dns_ip.clone()),
    }
}

/// Workload cluster CA certificate; empty while the CA secret does not exist.
async fn cluster_ca(store: &dyn AppStore, cluster_id: &str, namespace: &str) -> Result<String> {
    let name = keys::cluster_ca_name(cluster_id);
    match store.get_secret_data(namespace, &name).await {
        Ok(data) => Ok(data
            .get("tls.crt")
            .map(|crt| String::from_utf8_lossy(crt).into_owned())
            .unwrap_or_default()),
        Err(e) if e.is_not_found() => {
            debug!("Secret {}/{} not found, cluster CA left empty", namespace, name);
            Ok(String::new())
        }
        Err(e) => Err(e),
    }
}

fn merge_into(target: &mut Map<String, Value>, doc: Value) {
    if let Value::Object(fields) = doc {
        target.extend(fields);
    }
}

fn required_str<'a>(obj: &'a Value, pointer: &str, what: &str) -> Result<&'a str> {
    obj.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::ValidationError(format!("{what} is not set")))
}

async fn secret_values(
    store: &dyn AppStore,
    cluster: &Cluster,
    config: &OperatorConfig,
    facts: &ProviderFacts,
    namespace: &str,
) -> Result<Value> {
    let mut doc = Map::new();

    match (facts.kind, facts.object.as_ref()) {
        (ProviderKind::OpenStack, Some(obj)) => {
            if obj.pointer("/spec/identityRef/kind").and_then(Value::as_str) != Some("Secret") {
                return Err(Error::ValidationError(format!(
                    "identityRef of OpenStackCluster {} must reference a Secret",
                    cluster.name_any()
                )));
            }
            let identity = required_str(obj, "/spec/identityRef/name", "identityRef name")?;
            let data = store.get_secret_data(namespace, identity).await?;
            let clouds = data.get("clouds.yaml").ok_or_else(|| {
                Error::ValidationError(format!("secret {identity} has no clouds.yaml"))
            })?;
            merge_into(&mut doc, values::openstack_secret_values(facts, clouds)?);
        }
        (ProviderKind::CloudDirector, Some(obj)) => {
            let secret_name =
                required_str(obj, "/spec/userContext/secretRef/name", "VCD user context secret")?;
            let secret_namespace = obj
                .pointer("/spec/userContext/secretRef/namespace")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(namespace);
            let data = store.get_secret_data(secret_namespace, secret_name).await?;
            let token = data.get("refreshToken").ok_or_else(|| {
                Error::ValidationError(format!("secret {secret_name} has no refreshToken"))
            })?;
            doc.insert(
                "global".to_string(),
                values::cloud_director_secret_values(obj, &String::from_utf8_lossy(token)),
            );
        }
        _ => {}
    }

    if values::needs_proxy_secret(facts, &config.proxy) {
        merge_into(
            &mut doc,
            values::proxy_secret_values(&cluster.spec, &config.proxy),
        );
    }

    Ok(Value::Object(doc))
}
