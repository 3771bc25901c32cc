//! Main reconciler for Cluster resources
//!
//! Implements the controller pattern using kube-rs runtime. A live cluster
//! gets its namespace, config artifacts and Apps; a deleting cluster has them
//! torn down in dependency order before its finalizer is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector::ObjectRef,
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::{App, Cluster};
use crate::error::{Error, Result};

use super::apply::apply_apps;
use super::app_finalizer::sweep_app_finalizers;
use super::chart_name::{CatalogChartNames, ChartNameResolver, KubeCatalogLookup};
use super::config_artifacts::{self, ArtifactsOutcome};
use super::desired::Compiler;
use super::finalizers::{has_finalizer, CLUSTER_APPS_FINALIZER};
use super::keys;
use super::namespace as workload_namespace;
use super::pod_cidr::{ClusterPodCidr, PodCidrSource};
use super::release::{KubeReleaseSource, ReleaseSource};
use super::retry::RetryConfig;
use super::store::{AppStore, KubeStore};
use super::teardown::{second_tier_name, wait_for_platform_agent_gone, Teardown, TeardownStep};
use super::version_label::ensure_version_labels;

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "cluster";

/// Periodic resync of a converged cluster
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);
/// Requeue while waiting on something that is still going away or not there yet
const SUSPEND_REQUEUE: Duration = Duration::from_secs(30);
const NOT_LEADER_REQUEUE: Duration = Duration::from_secs(15);

/// Collaborators of the apply and cleanup flows
pub struct ReconcileContext {
    pub config: Arc<OperatorConfig>,
    pub store: Arc<dyn AppStore>,
    pub releases: Arc<dyn ReleaseSource>,
    pub charts: Arc<dyn ChartNameResolver>,
    pub pod_cidrs: Arc<dyn PodCidrSource>,
    /// Budget for waiting on the platform agent Deployment to disappear
    pub liveness_retry: RetryConfig,
}

impl ReconcileContext {
    /// Wires the API-server backed collaborators.
    pub fn from_client(client: Client, config: Arc<OperatorConfig>) -> Result<Self> {
        let charts = CatalogChartNames::new(KubeCatalogLookup::new(client.clone()))?;
        Ok(Self {
            store: Arc::new(KubeStore::new(client.clone())),
            releases: Arc::new(KubeReleaseSource::new(client)),
            charts: Arc::new(charts),
            pod_cidrs: Arc::new(ClusterPodCidr::new(config.default_pod_cidr.clone())),
            liveness_retry: RetryConfig::liveness(),
            config,
        })
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(
            &self.config,
            self.releases.as_ref(),
            self.charts.as_ref(),
            self.store.as_ref(),
        )
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub context: ReconcileContext,
    /// Only the lease holder reconciles
    pub is_leader: Arc<AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let (clusters, apps): (Api<Cluster>, Api<App>) =
        match state.context.config.watch_namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    info!("Starting Cluster controller");

    // Verify CRD exists
    match clusters.list(&Default::default()).await {
        Ok(_) => info!("Cluster CRD is available"),
        Err(e) => {
            error!("Cluster CRD not found. Is Cluster API installed? {:?}", e);
            return Err(Error::ConfigError("Cluster CRD not installed".to_string()));
        }
    }

    let managed_apps = Config::default().labels(&format!(
        "{}={}",
        keys::LABEL_MANAGED_BY,
        keys::PROJECT_NAME
    ));

    Controller::new(clusters, Config::default())
        // Our Apps carry no owner references; map them back by cluster label.
        .watches(apps, managed_apps, |app: App| {
            let cluster_id = app.labels().get(keys::LABEL_CLUSTER).cloned();
            let namespace = app.namespace();
            cluster_id.zip(namespace).map(|(id, ns)| ObjectRef::<Cluster>::new(&id).within(&ns))
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A Cluster is created, updated, or deleted
/// - One of the Apps we manage for it changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Cluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping Cluster {}", obj.name_any());
        return Ok(Action::requeue(NOT_LEADER_REQUEUE));
    }

    let namespace = keys::cluster_namespace(&obj);
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), &namespace);
    if !has_finalizer(&obj) && obj.metadata.deletion_timestamp.is_none() {
        info!("Adopting Cluster {}/{}", namespace, obj.name_any());
    }

    let started = Instant::now();
    let context = &ctx.context;
    let result = finalizer(&api, CLUSTER_APPS_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply_cluster(context, &cluster).await,
            FinalizerEvent::Cleanup(cluster) => cleanup_cluster(context, &cluster).await,
        }
    })
    .await
    .map_err(Error::from);

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    debug!("Reconcile took {:?}", started.elapsed());

    result
}

/// Brings a live cluster's namespace, config artifacts and Apps in line.
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
pub async fn apply_cluster(ctx: &ReconcileContext, cluster: &Cluster) -> Result<Action> {
    let cluster_id = keys::cluster_id(cluster);
    if cluster_id.is_empty() {
        return Err(Error::ValidationError(format!(
            "Cluster {} has neither a {} nor a {} label",
            cluster.name_any(),
            keys::LABEL_CLUSTER,
            keys::LABEL_CAPI_CLUSTER_NAME
        )));
    }
    let namespace = keys::cluster_namespace(cluster);
    let store = ctx.store.as_ref();

    info!("Applying Cluster {}/{}", namespace, cluster_id);

    workload_namespace::ensure_created(store, &cluster_id).await?;

    let mut suspended = false;
    if let ArtifactsOutcome::Suspended { reason } =
        config_artifacts::ensure_created(store, ctx.pod_cidrs.as_ref(), &ctx.config, cluster)
            .await?
    {
        info!("Config artifacts of cluster {} postponed: {}", cluster_id, reason);
        suspended = true;
    }

    let compiled = match ctx.compiler().compile(cluster).await {
        Ok(compiled) => compiled,
        Err(e) if e.is_not_found() => {
            info!("Apps of cluster {} postponed: {}", cluster_id, e);
            return Ok(Action::requeue(SUSPEND_REQUEUE));
        }
        Err(e) => return Err(e),
    };

    let outcome = apply_apps(store, &cluster_id, &namespace, &compiled.apps).await?;
    info!(
        "Apps of cluster {}: {} created, {} updated, {} unchanged",
        cluster_id,
        outcome.created.len(),
        outcome.updated.len(),
        outcome.unchanged
    );

    ensure_version_labels(store, ctx.releases.as_ref(), cluster).await?;

    if let Some(e) = compiled.failure_error() {
        return Err(e);
    }

    Ok(Action::requeue(if suspended {
        SUSPEND_REQUEUE
    } else {
        RESYNC_INTERVAL
    }))
}

/// Tears a deleting cluster down. Returning `Ok(await_change)` releases the
/// cluster finalizer; a requeue keeps it.
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
pub async fn cleanup_cluster(ctx: &ReconcileContext, cluster: &Cluster) -> Result<Action> {
    let cluster_id = keys::cluster_id(cluster);
    let namespace = keys::cluster_namespace(cluster);
    let store = ctx.store.as_ref();
    if cluster_id.is_empty() {
        warn!("Cluster {} has no id, nothing to clean up", cluster.name_any());
        return Ok(Action::await_change());
    }

    info!("Cleaning up Cluster {}/{}", namespace, cluster_id);

    let second_tier =
        second_tier_name(ctx.compiler().compile_as_live(cluster).await, &cluster_id)?;
    let step = Teardown::new(store, &cluster_id, &namespace, second_tier)
        .run()
        .await?;
    record_teardown(&cluster_id, &step);
    if let TeardownStep::Suspended { phase, remaining } = step {
        info!(
            "Teardown of cluster {} waiting in phase {} on {}",
            cluster_id,
            phase,
            remaining.join(", ")
        );
        return Ok(Action::requeue(SUSPEND_REQUEUE));
    }

    wait_for_platform_agent_gone(store, &namespace, &cluster_id, &ctx.liveness_retry).await?;

    let sweep = sweep_app_finalizers(store, &cluster_id, &namespace).await?;
    if sweep.keep_finalizer() {
        return Ok(Action::requeue(SUSPEND_REQUEUE));
    }

    config_artifacts::ensure_deleted(store, &cluster_id, &namespace).await?;
    workload_namespace::ensure_deleted(store, &cluster_id).await?;

    #[cfg(feature = "metrics")]
    super::metrics::forget_cluster(&cluster_id);

    info!("Cluster {}/{} cleaned up", namespace, cluster_id);
    Ok(Action::await_change())
}

#[cfg(feature = "metrics")]
fn record_teardown(cluster_id: &str, step: &TeardownStep) {
    use super::metrics;
    use super::teardown::TeardownPhase;

    let dangling = match step {
        TeardownStep::Suspended {
            phase: TeardownPhase::WaitingTenantGone,
            remaining,
        } => remaining.len(),
        _ => 0,
    };
    metrics::set_dangling_apps(cluster_id, dangling);
    metrics::set_teardown_phase(cluster_id, step.phase().ordinal());
}

#[cfg(not(feature = "metrics"))]
fn record_teardown(_cluster_id: &str, _step: &TeardownStep) {}

fn error_policy(cluster: Arc<Cluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", cluster.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
