//! Workload cluster namespace named after the cluster id

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::error::{is_kube_already_exists, Error, Result};

use super::keys;
use super::store::AppStore;

pub fn desired_namespace(cluster_id: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(cluster_id.to_string()),
            labels: Some(keys::managed_labels(cluster_id)),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn ensure_created(store: &dyn AppStore, cluster_id: &str) -> Result<()> {
    match store.create_namespace(&desired_namespace(cluster_id)).await {
        Ok(()) => {
            info!("Created namespace {}", cluster_id);
            Ok(())
        }
        Err(Error::KubeError(e)) if is_kube_already_exists(&e) => {
            debug!("Namespace {} already exists", cluster_id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Deletes the namespace, but only if it is ours.
pub async fn ensure_deleted(store: &dyn AppStore, cluster_id: &str) -> Result<()> {
    let namespace = match store.get_namespace(cluster_id).await {
        Ok(ns) => ns,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    if !keys::is_managed_by_us(namespace.labels()) {
        debug!("Namespace {} is not managed by us, keeping it", cluster_id);
        return Ok(());
    }

    match store.delete_namespace(cluster_id).await {
        Ok(()) => {
            info!("Deleted namespace {}", cluster_id);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
