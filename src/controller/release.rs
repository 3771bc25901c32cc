//! Release manifest lookup
//!
//! A cluster selects its release through the `release.giantswarm.io/version`
//! label. The release lists component versions (the platform agent among
//! them) and the apps installed into the workload cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cluster, Release};
use crate::error::{Error, Result};

use super::keys;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentVersion {
    pub version: String,
    pub catalog: Option<String>,
    pub reference: Option<String>,
}

impl ComponentVersion {
    /// Version to deploy: the reference when set, else the release version.
    pub fn deploy_version(&self) -> &str {
        self.reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.version)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseApp {
    pub version: String,
    pub catalog: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn component_versions(&self, cluster: &Cluster)
        -> Result<BTreeMap<String, ComponentVersion>>;

    async fn apps(&self, cluster: &Cluster) -> Result<BTreeMap<String, ReleaseApp>>;
}

/// The platform agent component every compile depends on. A release
/// without it is unusable, not merely incomplete.
pub fn platform_agent_component(
    components: &BTreeMap<String, ComponentVersion>,
) -> Result<&ComponentVersion> {
    components
        .get(keys::APP_OPERATOR)
        .filter(|c| !c.version.is_empty())
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "release has no {} component version",
                keys::APP_OPERATOR
            ))
        })
}

pub fn components_of(release: &Release) -> BTreeMap<String, ComponentVersion> {
    release
        .spec
        .components
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                ComponentVersion {
                    version: c.version.clone(),
                    catalog: c.catalog.clone(),
                    reference: c.reference.clone(),
                },
            )
        })
        .collect()
}

pub fn apps_of(release: &Release) -> BTreeMap<String, ReleaseApp> {
    release
        .spec
        .apps
        .iter()
        .map(|a| {
            (
                a.name.clone(),
                ReleaseApp {
                    version: a.version.clone(),
                    catalog: a.catalog.clone(),
                },
            )
        })
        .collect()
}

/// [`ReleaseSource`] reading cluster-scoped `Release` resources
#[derive(Clone)]
pub struct KubeReleaseSource {
    api: Api<Release>,
}

impl KubeReleaseSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    async fn release_for(&self, cluster: &Cluster) -> Result<Release> {
        let version = keys::release_version(cluster).ok_or_else(|| {
            Error::not_found(format!("{} label", keys::LABEL_RELEASE_VERSION), cluster.name_any())
        })?;
        let name = keys::release_name(&version);
        debug!("Reading release {} for cluster {}", name, cluster.name_any());
        self.api
            .get_opt(&name)
            .await?
            .ok_or_else(|| Error::not_found("Release", name))
    }
}

#[async_trait]
impl ReleaseSource for KubeReleaseSource {
    async fn component_versions(
        &self,
        cluster: &Cluster,
    ) -> Result<BTreeMap<String, ComponentVersion>> {
        Ok(components_of(&self.release_for(cluster).await?))
    }

    async fn apps(&self, cluster: &Cluster) -> Result<BTreeMap<String, ReleaseApp>> {
        Ok(apps_of(&self.release_for(cluster).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ReleaseSpec, ReleaseSpecApp, ReleaseSpecComponent};

    fn release() -> Release {
        Release::new(
            "v25.0.0",
            ReleaseSpec {
                apps: vec![
                    ReleaseSpecApp {
                        name: "coredns".into(),
                        version: "1.21.0".into(),
                        ..Default::default()
                    },
                    ReleaseSpecApp {
                        name: "cert-exporter".into(),
                        version: "2.9.0".into(),
                        catalog: Some("control-plane-catalog".into()),
                    },
                ],
                components: vec![ReleaseSpecComponent {
                    name: "app-operator".into(),
                    version: "6.11.0".into(),
                    catalog: None,
                    reference: Some("6.11.0-abc123".into()),
                }],
                state: None,
            },
        )
    }

    #[test]
    fn maps_are_ordered_by_name() {
        let apps = apps_of(&release());
        let names: Vec<_> = apps.keys().cloned().collect();
        assert_eq!(names, ["cert-exporter", "coredns"]);
        assert_eq!(
            apps["cert-exporter"].catalog.as_deref(),
            Some("control-plane-catalog")
        );
    }

    #[test]
    fn platform_agent_prefers_reference() {
        let components = components_of(&release());
        let agent = platform_agent_component(&components).unwrap();
        assert_eq!(agent.version, "6.11.0");
        assert_eq!(agent.deploy_version(), "6.11.0-abc123");
    }

    #[test]
    fn missing_platform_agent_is_validation_error() {
        let err = platform_agent_component(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(!err.is_not_found());
    }
}
