//! Version label maintenance for user-installed Apps
//!
//! The platform agent only reconciles Apps whose
//! `app-operator.giantswarm.io/version` label matches its own version, so
//! Apps users install next to ours follow the release's agent version.

use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use crate::crd::Cluster;
use crate::error::Result;

use super::keys;
use super::release::{platform_agent_component, ReleaseSource};
use super::store::{AppStore, Selector};

/// Patches the version label of every unmanaged App of the cluster whose
/// label differs from the platform agent version. Returns the patched names.
pub async fn ensure_version_labels(
    store: &dyn AppStore,
    releases: &dyn ReleaseSource,
    cluster: &Cluster,
) -> Result<Vec<String>> {
    let cluster_id = keys::cluster_id(cluster);
    let namespace = keys::cluster_namespace(cluster);

    let selector = Selector::new()
        .eq(keys::LABEL_CLUSTER, &cluster_id)
        .not_eq(keys::LABEL_MANAGED_BY, keys::PROJECT_NAME);
    let apps = store.list_apps(&namespace, &selector).await?;
    debug!("Found {} user app(s) for cluster {}", apps.len(), cluster_id);
    if apps.is_empty() {
        return Ok(Vec::new());
    }

    let components = releases.component_versions(cluster).await?;
    let version = platform_agent_component(&components)?.version.clone();

    let mut patched = Vec::new();
    for app in apps {
        if keys::is_deleting(&app) {
            continue;
        }
        if app.labels().get(keys::LABEL_APP_OPERATOR_VERSION) == Some(&version) {
            continue;
        }

        let name = app.name_any();
        let patch = json!({
            "metadata": { "labels": { keys::LABEL_APP_OPERATOR_VERSION: version } }
        });
        store.patch_app(&namespace, &name, &patch).await?;
        patched.push(name);
    }

    if !patched.is_empty() {
        info!(
            "Updated version label of {} app(s) in cluster {} to {}",
            patched.len(),
            cluster_id,
            version
        );
    }
    Ok(patched)
}
