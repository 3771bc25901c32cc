//! Finalizer handling for Cluster cleanup
//!
//! The finalizer keeps a deleting Cluster around until its Apps are gone in
//! dependency order, the platform agent has stopped, and the config artifacts
//! and namespace are removed. The kube-rs `finalizer` helper adds and removes
//! it; cleanup returning `Ok` is what releases the Cluster.

use kube::ResourceExt;

use crate::crd::Cluster;

/// Finalizer name used to protect Cluster resources
pub const CLUSTER_APPS_FINALIZER: &str = "cluster-apps.giantswarm.io/finalizer";

/// Check if the cluster has our finalizer
pub fn has_finalizer(cluster: &Cluster) -> bool {
    cluster
        .finalizers()
        .iter()
        .any(|f| f == CLUSTER_APPS_FINALIZER)
}
