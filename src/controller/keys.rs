//! Label keys, annotation keys and derived object names
//!
//! Everything that encodes a naming convention shared with other controllers
//! lives here so the literals are defined once.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::{App, Cluster};

pub const PROJECT_NAME: &str = "cluster-apps-operator";

pub const LABEL_CLUSTER: &str = "giantswarm.io/cluster";
pub const LABEL_CAPI_CLUSTER_NAME: &str = "cluster.x-k8s.io/cluster-name";
pub const LABEL_MANAGED_BY: &str = "giantswarm.io/managed-by";
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_OPERATOR_VERSION: &str = "app-operator.giantswarm.io/version";
pub const LABEL_RELEASE_VERSION: &str = "release.giantswarm.io/version";

pub const LABEL_FLUX_KUSTOMIZATION_NAME: &str = "kustomize.toolkit.fluxcd.io/name";
pub const LABEL_FLUX_KUSTOMIZATION_NAMESPACE: &str = "kustomize.toolkit.fluxcd.io/namespace";

pub const ANNOTATION_FORCE_HELM_UPGRADE: &str = "chart-operator.giantswarm.io/force-helm-upgrade";
pub const ANNOTATION_NOTES: &str = "giantswarm.io/notes";

/// Annotations the platform agent writes back onto Apps. A desired-state
/// overwrite keeps their current values unless it sets them itself.
pub const PRESERVED_ANNOTATIONS: &[&str] = &[
    "app-operator.giantswarm.io/latest-configmap-version",
    "app-operator.giantswarm.io/latest-secret-version",
];

/// Finalizer the platform agent puts on every App it reconciles
pub const APP_OPERATOR_APP_FINALIZER: &str = "operatorkit.giantswarm.io/app-operator-app";

pub const APP_OPERATOR: &str = "app-operator";
pub const CHART_OPERATOR: &str = "chart-operator";

/// Version label of the platform agent App. Only the management cluster
/// instance, which always carries this version, reconciles it.
pub const UNIQUE_OPERATOR_VERSION: &str = "0.0.0";

/// Release entries a managed AWS control plane already provides
pub const MANAGED_AWS_EXCLUDED_APPS: &[&str] = &["aws-cni", "coredns", "kube-proxy"];

/// Cluster identifier, falling back to the upstream Cluster API label.
pub fn cluster_id(cluster: &Cluster) -> String {
    let labels = cluster.labels();
    labels
        .get(LABEL_CLUSTER)
        .filter(|id| !id.is_empty())
        .or_else(|| labels.get(LABEL_CAPI_CLUSTER_NAME))
        .cloned()
        .unwrap_or_default()
}

pub fn cluster_namespace(cluster: &Cluster) -> String {
    cluster.namespace().unwrap_or_else(|| "default".to_string())
}

pub fn release_version(cluster: &Cluster) -> Option<String> {
    cluster
        .labels()
        .get(LABEL_RELEASE_VERSION)
        .filter(|v| !v.is_empty())
        .cloned()
}

pub fn release_name(version: &str) -> String {
    format!("v{}", version.trim_start_matches('v'))
}

pub fn app_operator_app_name(cluster_id: &str) -> String {
    format!("{cluster_id}-{APP_OPERATOR}")
}

pub fn chart_operator_app_name(cluster_id: &str) -> String {
    format!("{cluster_id}-{CHART_OPERATOR}")
}

/// Name of the Deployment the platform agent chart creates
pub fn app_operator_deployment_name(cluster_id: &str) -> String {
    format!("{APP_OPERATOR}-{cluster_id}")
}

pub fn app_operator_values_name(cluster_id: &str) -> String {
    format!("{cluster_id}-app-operator-values")
}

pub fn cluster_values_name(cluster_id: &str) -> String {
    format!("{cluster_id}-cluster-values")
}

pub fn cluster_ca_name(cluster_id: &str) -> String {
    format!("{cluster_id}-ca")
}

pub fn kubeconfig_secret_name(cluster_id: &str) -> String {
    format!("{cluster_id}-kubeconfig")
}

pub fn base_domain(cluster_id: &str, base: &str) -> String {
    format!("{cluster_id}.{base}")
}

pub fn user_config_map_name(app_name: &str) -> String {
    format!("{app_name}-user-values")
}

pub fn user_secret_name(app_name: &str) -> String {
    format!("{app_name}-user-secrets")
}

/// Labels every object this operator creates for a cluster carries.
pub fn managed_labels(cluster_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_id.to_string()),
        (LABEL_MANAGED_BY.to_string(), PROJECT_NAME.to_string()),
    ])
}

pub fn is_managed_by_us(labels: &BTreeMap<String, String>) -> bool {
    labels.get(LABEL_MANAGED_BY).map(String::as_str) == Some(PROJECT_NAME)
}

/// True when a GitOps controller owns the App. Deleting it would fight the
/// other controller, which would simply recreate it.
pub fn is_foreign_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.contains_key(LABEL_FLUX_KUSTOMIZATION_NAME)
        && labels.contains_key(LABEL_FLUX_KUSTOMIZATION_NAMESPACE)
}

pub fn is_deleting(app: &App) -> bool {
    app.metadata.deletion_timestamp.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    use crate::crd::ClusterSpec;

    fn cluster_with_labels(labels: &[(&str, &str)]) -> Cluster {
        Cluster {
            metadata: ObjectMeta {
                name: Some("demo0".into()),
                namespace: Some("org-acme".into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: ClusterSpec::default(),
            status: None,
        }
    }

    #[test]
    fn cluster_id_prefers_own_label() {
        let cluster = cluster_with_labels(&[
            (LABEL_CLUSTER, "demo0"),
            (LABEL_CAPI_CLUSTER_NAME, "upstream"),
        ]);
        assert_eq!(cluster_id(&cluster), "demo0");
    }

    #[test]
    fn cluster_id_falls_back_to_upstream_label() {
        let cluster = cluster_with_labels(&[(LABEL_CAPI_CLUSTER_NAME, "upstream")]);
        assert_eq!(cluster_id(&cluster), "upstream");

        let cluster = cluster_with_labels(&[(LABEL_CLUSTER, ""), (LABEL_CAPI_CLUSTER_NAME, "up")]);
        assert_eq!(cluster_id(&cluster), "up");
    }

    #[test]
    fn derived_names() {
        assert_eq!(app_operator_app_name("demo0"), "demo0-app-operator");
        assert_eq!(chart_operator_app_name("demo0"), "demo0-chart-operator");
        assert_eq!(app_operator_deployment_name("demo0"), "app-operator-demo0");
        assert_eq!(cluster_values_name("demo0"), "demo0-cluster-values");
        assert_eq!(base_domain("demo0", "example.com"), "demo0.example.com");
        assert_eq!(release_name("20.1.0"), "v20.1.0");
        assert_eq!(release_name("v20.1.0"), "v20.1.0");
    }

    #[test]
    fn foreign_management_needs_both_labels() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_FLUX_KUSTOMIZATION_NAME.to_string(), "apps".to_string());
        assert!(!is_foreign_managed(&labels));

        labels.insert(
            LABEL_FLUX_KUSTOMIZATION_NAMESPACE.to_string(),
            "flux-system".to_string(),
        );
        assert!(is_foreign_managed(&labels));
    }

    #[test]
    fn managed_labels_mark_ownership() {
        let labels = managed_labels("demo0");
        assert!(is_managed_by_us(&labels));
        assert_eq!(labels[LABEL_CLUSTER], "demo0");
        assert!(!is_managed_by_us(&BTreeMap::new()));
    }
}
