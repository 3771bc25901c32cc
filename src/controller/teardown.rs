//! Ordered deletion of a cluster's Apps
//!
//! Apps go away in dependency order: tenant Apps first, then the second-tier
//! chart operator, then the platform agent. The current phase is never
//! stored; every pass re-derives it from live reads and resumes where the
//! previous pass stopped. A phase that is still waiting on the API server
//! suspends the pass, which is backpressure and not an error.

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::crd::App;
use crate::error::{Error, Result};

use super::desired::Compiled;
use super::keys;
use super::retry::{retry_with_backoff, RetryConfig};
use super::store::{AppStore, Selector};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TeardownPhase {
    CollectingTenantApps,
    DeletingTenantApps,
    WaitingTenantGone,
    DeletingSecondTier,
    WaitingSecondTierGone,
    DeletingPlatformAgent,
    WaitingPlatformAgentGone,
    Done,
}

impl TeardownPhase {
    /// Ordinal exported as the teardown phase gauge
    pub fn ordinal(self) -> i64 {
        self as i64
    }
}

impl std::fmt::Display for TeardownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CollectingTenantApps => "collecting-tenant-apps",
            Self::DeletingTenantApps => "deleting-tenant-apps",
            Self::WaitingTenantGone => "waiting-tenant-gone",
            Self::DeletingSecondTier => "deleting-second-tier",
            Self::WaitingSecondTierGone => "waiting-second-tier-gone",
            Self::DeletingPlatformAgent => "deleting-platform-agent",
            Self::WaitingPlatformAgentGone => "waiting-platform-agent-gone",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    /// Keep the cluster finalizer and retry on the next pass
    Suspended {
        phase: TeardownPhase,
        remaining: Vec<String>,
    },
    Done,
}

impl TeardownStep {
    pub fn phase(&self) -> TeardownPhase {
        match self {
            Self::Suspended { phase, .. } => *phase,
            Self::Done => TeardownPhase::Done,
        }
    }
}

/// Name of the second-tier App, from the desired state the cluster would
/// have if it were live. Falls back to the conventional name when that
/// state cannot be compiled any more because its release is gone or
/// unusable; store and transport failures are returned.
pub fn second_tier_name(compiled: Result<Compiled>, cluster_id: &str) -> Result<String> {
    match compiled {
        Ok(compiled) => Ok(compiled
            .by_chart_app(keys::CHART_OPERATOR)
            .map(|app| app.name_any())
            .unwrap_or_else(|| keys::chart_operator_app_name(cluster_id))),
        Err(e) if e.is_not_found() || matches!(e, Error::ValidationError(_)) => {
            debug!("Using default chart operator App name: {}", e);
            Ok(keys::chart_operator_app_name(cluster_id))
        }
        Err(e) => Err(e),
    }
}

pub struct Teardown<'a> {
    store: &'a dyn AppStore,
    cluster_id: String,
    namespace: String,
    second_tier: String,
    platform_agent: String,
}

impl<'a> Teardown<'a> {
    pub fn new(
        store: &'a dyn AppStore,
        cluster_id: impl Into<String>,
        namespace: impl Into<String>,
        second_tier: impl Into<String>,
    ) -> Self {
        let cluster_id = cluster_id.into();
        let platform_agent = keys::app_operator_app_name(&cluster_id);
        Self {
            store,
            cluster_id,
            namespace: namespace.into(),
            second_tier: second_tier.into(),
            platform_agent,
        }
    }

    /// Advances the teardown as far as the live state allows.
    #[instrument(skip(self), fields(cluster_id = %self.cluster_id, namespace = %self.namespace))]
    pub async fn run(&self) -> Result<TeardownStep> {
        debug!(phase = %TeardownPhase::CollectingTenantApps);
        let tenants = self.tenant_apps().await?;
        if !tenants.is_empty() {
            debug!(phase = %TeardownPhase::DeletingTenantApps, count = tenants.len());
            self.delete_tenants(&tenants).await?;

            let remaining: Vec<String> = self
                .tenant_apps()
                .await?
                .iter()
                .map(|app| app.name_any())
                .collect();
            if !remaining.is_empty() {
                info!(
                    "Waiting for {} tenant app(s) of cluster {} to be deleted",
                    remaining.len(),
                    self.cluster_id
                );
                return Ok(TeardownStep::Suspended {
                    phase: TeardownPhase::WaitingTenantGone,
                    remaining,
                });
            }
        }

        debug!(phase = %TeardownPhase::DeletingSecondTier, app = %self.second_tier);
        if let Some(step) = self
            .remove_app(&self.second_tier, TeardownPhase::WaitingSecondTierGone)
            .await?
        {
            return Ok(step);
        }

        debug!(phase = %TeardownPhase::DeletingPlatformAgent, app = %self.platform_agent);
        if let Some(step) = self
            .remove_app(&self.platform_agent, TeardownPhase::WaitingPlatformAgentGone)
            .await?
        {
            return Ok(step);
        }

        Ok(TeardownStep::Done)
    }

    /// Apps of the cluster that must go before the operators serving them:
    /// everything we did not create, plus any of our own Apps other than
    /// the two operators.
    async fn tenant_apps(&self) -> Result<Vec<App>> {
        let unmanaged = Selector::new()
            .eq(keys::LABEL_CLUSTER, &self.cluster_id)
            .not_eq(keys::LABEL_MANAGED_BY, keys::PROJECT_NAME);
        let managed = Selector::new()
            .eq(keys::LABEL_CLUSTER, &self.cluster_id)
            .eq(keys::LABEL_MANAGED_BY, keys::PROJECT_NAME);

        let mut apps = self.store.list_apps(&self.namespace, &unmanaged).await?;
        apps.extend(
            self.store
                .list_apps(&self.namespace, &managed)
                .await?
                .into_iter()
                .filter(|app| {
                    let name = app.name_any();
                    name != self.second_tier && name != self.platform_agent
                }),
        );
        Ok(apps)
    }

    async fn delete_tenants(&self, tenants: &[App]) -> Result<()> {
        for app in tenants {
            let name = app.name_any();
            if keys::is_deleting(app) {
                debug!("App {} is already being deleted", name);
                continue;
            }
            if keys::is_foreign_managed(app.labels()) {
                debug!("App {} is managed by a GitOps controller, skipping", name);
                continue;
            }
            self.delete_app(&name).await?;
        }
        Ok(())
    }

    async fn delete_app(&self, name: &str) -> Result<()> {
        match self.store.delete_app(&self.namespace, name).await {
            Ok(()) => {
                info!("Requested deletion of App {}/{}", self.namespace, name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes one App and reports a suspension while it still exists.
    async fn remove_app(
        &self,
        name: &str,
        waiting: TeardownPhase,
    ) -> Result<Option<TeardownStep>> {
        let app = match self.store.get_app(&self.namespace, name).await {
            Ok(app) => app,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if !keys::is_deleting(&app) {
            self.delete_app(name).await?;
        }

        match self.store.get_app(&self.namespace, name).await {
            Ok(_) => {
                info!("Waiting for App {}/{} to be deleted", self.namespace, name);
                Ok(Some(TeardownStep::Suspended {
                    phase: waiting,
                    remaining: vec![name.to_string()],
                }))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Blocks until the platform agent Deployment is gone, backing off between
/// checks. A Deployment outliving the budget is a hard error: releasing the
/// cluster then would leave a running agent without its resources.
pub async fn wait_for_platform_agent_gone(
    store: &dyn AppStore,
    namespace: &str,
    cluster_id: &str,
    retry: &RetryConfig,
) -> Result<()> {
    let deployment = keys::app_operator_deployment_name(cluster_id);
    retry_with_backoff(retry, "platform_agent_liveness", || {
        let deployment = deployment.clone();
        async move {
            if store.deployment_exists(namespace, &deployment).await? {
                Err(Error::NotDeleted(format!("deployment {namespace}/{deployment}")))
            } else {
                Ok(())
            }
        }
    })
    .await
}
