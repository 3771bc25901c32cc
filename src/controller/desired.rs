//! Desired-state compiler
//!
//! Computes the Apps a live cluster needs: the platform agent first, then one
//! App per release manifest entry. A manifest entry that cannot be resolved
//! is reported in [`Compiled::failures`] without affecting the others.

use std::collections::{BTreeMap, BTreeSet};

use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::config::OperatorConfig;
use crate::crd::{
    App, AppConfig, AppKubeConfig, AppSpec, AppUserConfig, Cluster, KubeConfigContext,
    NamespacedName,
};
use crate::error::{Error, Result};

use super::chart_name::ChartNameResolver;
use super::keys;
use super::release::{platform_agent_component, ComponentVersion, ReleaseApp, ReleaseSource};
use super::store::AppStore;

#[derive(Debug, Default)]
pub struct Compiled {
    /// Platform agent first, then manifest entries in manifest order
    pub apps: Vec<App>,
    /// Manifest entries that could not be compiled, by app name
    pub failures: Vec<(String, Error)>,
}

impl Compiled {
    /// Desired App for the logical app `app`, e.g. the second-tier operator
    pub fn by_chart_app(&self, app: &str) -> Option<&App> {
        self.apps
            .iter()
            .find(|a| a.labels().get(keys::LABEL_APP_NAME).map(String::as_str) == Some(app))
    }

    /// One error describing every failed entry, if any failed
    pub fn failure_error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let detail = self
            .failures
            .iter()
            .map(|(app, e)| format!("{app}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::ValidationError(format!(
            "{} app(s) could not be compiled: {detail}",
            self.failures.len()
        )))
    }
}

/// Existing user-provided config objects in the cluster namespace
#[derive(Debug, Default)]
struct UserConfigIndex {
    config_maps: BTreeSet<String>,
    secrets: BTreeSet<String>,
}

impl UserConfigIndex {
    fn user_config(&self, app_name: &str, namespace: &str) -> Option<AppUserConfig> {
        let config_map_name = keys::user_config_map_name(app_name);
        let secret_name = keys::user_secret_name(app_name);
        let user_config = AppUserConfig {
            config_map: self
                .config_maps
                .contains(&config_map_name)
                .then(|| NamespacedName::new(config_map_name, namespace)),
            secret: self
                .secrets
                .contains(&secret_name)
                .then(|| NamespacedName::new(secret_name, namespace)),
        };
        (!user_config.is_empty()).then_some(user_config)
    }
}

pub struct Compiler<'a> {
    config: &'a OperatorConfig,
    releases: &'a dyn ReleaseSource,
    charts: &'a dyn ChartNameResolver,
    store: &'a dyn AppStore,
}

impl<'a> Compiler<'a> {
    pub fn new(
        config: &'a OperatorConfig,
        releases: &'a dyn ReleaseSource,
        charts: &'a dyn ChartNameResolver,
        store: &'a dyn AppStore,
    ) -> Self {
        Self {
            config,
            releases,
            charts,
            store,
        }
    }

    /// Desired Apps for `cluster`. Nothing is desired once deletion started.
    pub async fn compile(&self, cluster: &Cluster) -> Result<Compiled> {
        if cluster.metadata.deletion_timestamp.is_some() {
            debug!("Cluster {} is deleting, no apps desired", cluster.name_any());
            return Ok(Compiled::default());
        }
        self.compile_as_live(cluster).await
    }

    /// Desired Apps as if the cluster were not being deleted. Teardown uses
    /// this to recover the names of the Apps it must remove in order.
    pub async fn compile_as_live(&self, cluster: &Cluster) -> Result<Compiled> {
        let cluster_id = keys::cluster_id(cluster);
        let namespace = keys::cluster_namespace(cluster);

        let components = self.releases.component_versions(cluster).await?;
        let agent = platform_agent_component(&components)?;

        let mut compiled = Compiled {
            apps: vec![self.platform_agent_app(&cluster_id, &namespace, agent)],
            failures: Vec::new(),
        };

        let release_apps = self.releases.apps(cluster).await?;
        let user_configs = UserConfigIndex {
            config_maps: self.store.list_config_map_names(&namespace).await?,
            secrets: self.store.list_secret_names(&namespace).await?,
        };
        let managed_aws = cluster.spec.is_managed_aws();

        for (app, entry) in &release_apps {
            if app == keys::APP_OPERATOR {
                continue;
            }
            if managed_aws && keys::MANAGED_AWS_EXCLUDED_APPS.contains(&app.as_str()) {
                debug!("Skipping {} provided by the managed control plane", app);
                continue;
            }

            match self
                .manifest_app(&cluster_id, &namespace, app, entry, &agent.version, &user_configs)
                .await
            {
                Ok(desired) => compiled.apps.push(desired),
                Err(e) => {
                    warn!("Could not compile app {} for cluster {}: {}", app, cluster_id, e);
                    compiled.failures.push((app.clone(), e));
                }
            }
        }

        Ok(compiled)
    }

    fn platform_agent_app(
        &self,
        cluster_id: &str,
        namespace: &str,
        agent: &ComponentVersion,
    ) -> App {
        let catalog = agent
            .catalog
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.app_defaults.catalog.clone());

        App {
            metadata: app_metadata(
                keys::app_operator_app_name(cluster_id),
                namespace,
                cluster_id,
                keys::APP_OPERATOR,
                keys::UNIQUE_OPERATOR_VERSION,
                false,
            ),
            spec: AppSpec {
                catalog,
                name: keys::APP_OPERATOR.to_string(),
                namespace: namespace.to_string(),
                version: agent.deploy_version().to_string(),
                config: Some(AppConfig {
                    config_map: Some(NamespacedName::new(
                        keys::app_operator_values_name(cluster_id),
                        namespace,
                    )),
                    secret: None,
                }),
                kube_config: AppKubeConfig {
                    in_cluster: true,
                    ..Default::default()
                },
                user_config: None,
            },
        }
    }

    async fn manifest_app(
        &self,
        cluster_id: &str,
        namespace: &str,
        app: &str,
        entry: &ReleaseApp,
        agent_version: &str,
        user_configs: &UserConfigIndex,
    ) -> Result<App> {
        let defaults = &self.config.app_defaults;
        let rule = self.config.override_for(app).cloned().unwrap_or_default();

        let catalog = entry
            .catalog
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| defaults.catalog.clone());

        let chart = match rule.chart.filter(|c| !c.is_empty()) {
            Some(chart) => chart,
            None => {
                self.charts
                    .chart_name(&catalog, app, &entry.version)
                    .await?
            }
        };

        let target_namespace = rule
            .namespace
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| defaults.namespace.clone());
        let use_upgrade_force = rule.use_upgrade_force.unwrap_or(defaults.use_upgrade_force);

        let config_map_name = rule
            .config_map_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| keys::cluster_values_name(cluster_id));
        let secret = rule
            .has_cluster_values_secret
            .unwrap_or(false)
            .then(|| NamespacedName::new(keys::cluster_values_name(cluster_id), namespace));

        let kube_config = if rule.in_cluster.unwrap_or(false) {
            AppKubeConfig {
                in_cluster: true,
                ..Default::default()
            }
        } else {
            let kubeconfig = keys::kubeconfig_secret_name(cluster_id);
            AppKubeConfig {
                in_cluster: false,
                context: Some(KubeConfigContext {
                    name: kubeconfig.clone(),
                }),
                secret: Some(NamespacedName::new(kubeconfig, namespace)),
            }
        };

        let name = format!("{cluster_id}-{app}");
        let user_config = user_configs.user_config(&name, namespace);

        Ok(App {
            metadata: app_metadata(
                name,
                namespace,
                cluster_id,
                app,
                agent_version,
                use_upgrade_force,
            ),
            spec: AppSpec {
                catalog,
                name: chart,
                namespace: target_namespace,
                version: entry.version.clone(),
                config: Some(AppConfig {
                    config_map: Some(NamespacedName::new(config_map_name, namespace)),
                    secret,
                }),
                kube_config,
                user_config,
            },
        })
    }
}

fn app_metadata(
    name: String,
    namespace: &str,
    cluster_id: &str,
    app: &str,
    operator_version: &str,
    use_upgrade_force: bool,
) -> ObjectMeta {
    let mut labels = keys::managed_labels(cluster_id);
    labels.insert(keys::LABEL_APP_NAME.to_string(), app.to_string());
    labels.insert(
        keys::LABEL_APP_OPERATOR_VERSION.to_string(),
        operator_version.to_string(),
    );

    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        annotations: Some(BTreeMap::from([(
            keys::ANNOTATION_FORCE_HELM_UPGRADE.to_string(),
            use_upgrade_force.to_string(),
        )])),
        ..Default::default()
    }
}
