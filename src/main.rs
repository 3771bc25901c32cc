use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workload_apps_operator::config::{AppConfigFile, OperatorConfig, ProxyConfig};
use workload_apps_operator::controller::{self, values, ReconcileContext};
use workload_apps_operator::crd::Cluster;
use workload_apps_operator::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show cluster information
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace, used for the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Base domain of the management cluster
    #[arg(long, env = "BASE_DOMAIN")]
    base_domain: String,

    /// Service CIDR of workload clusters
    #[arg(long, env = "CLUSTER_IP_RANGE", default_value = "172.31.0.0/16")]
    cluster_ip_range: String,

    /// DNS service IP of workload clusters; derived from --cluster-ip-range when unset
    #[arg(long, env = "DNS_IP")]
    dns_ip: Option<String>,

    /// Container registry domain written into the platform agent values
    #[arg(long, env = "REGISTRY_DOMAIN", default_value = "gsoci.azurecr.io")]
    registry_domain: String,

    /// Provider kind of the management cluster
    #[arg(long, env = "PROVIDER", default_value = "")]
    provider: String,

    /// Pod CIDR for clusters that do not set one
    #[arg(long, env = "DEFAULT_POD_CIDR", default_value = "")]
    default_pod_cidr: String,

    #[arg(long, env = "HTTP_PROXY", default_value = "")]
    http_proxy: String,

    #[arg(long, env = "HTTPS_PROXY", default_value = "")]
    https_proxy: String,

    #[arg(long, env = "NO_PROXY", default_value = "")]
    no_proxy: String,

    /// YAML file with the `default:` and `overrides:` app settings
    #[arg(long, env = "APP_CONFIG")]
    app_config: PathBuf,

    /// Port of the /health and /metrics endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    /// Only reconcile clusters in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl RunArgs {
    fn operator_config(&self) -> Result<OperatorConfig, Error> {
        let dns_ip = match &self.dns_ip {
            Some(ip) if !ip.is_empty() => ip.clone(),
            _ => values::dns_ip(&self.cluster_ip_range)?,
        };

        let config = OperatorConfig {
            base_domain: self.base_domain.clone(),
            cluster_ip_range: self.cluster_ip_range.clone(),
            dns_ip,
            registry_domain: self.registry_domain.clone(),
            provider: self.provider.clone(),
            default_pod_cidr: self.default_pod_cidr.clone(),
            proxy: ProxyConfig {
                http_proxy: self.http_proxy.clone(),
                https_proxy: self.https_proxy.clone(),
                no_proxy: self.no_proxy.clone(),
            },
            watch_namespace: self.watch_namespace.clone().filter(|ns| !ns.is_empty()),
            ..Default::default()
        }
        .with_app_config(AppConfigFile::load(&self.app_config)?);

        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Only count clusters in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Workload Apps Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: Api<Cluster> = match args.namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let clusters = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Workload clusters: {}", clusters.items.len());
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_json);

    info!(
        "Starting Workload Apps Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(args.operator_config()?);
    info!(
        "Using base domain {}, DNS IP {}, {} app override(s)",
        config.base_domain,
        config.dns_ip,
        config.overrides.len()
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Leader election configuration
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));

    {
        let lease_client = client.clone();
        let lease_ns = leader_namespace.clone();
        let identity = holder_identity.clone();
        let is_leader_bg = Arc::clone(&is_leader);

        tokio::spawn(async move {
            run_leader_election(lease_client, &lease_ns, &identity, is_leader_bg).await;
        });
    }

    // Create shared controller state
    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
        context: ReconcileContext::from_client(client.clone(), config)?,
        is_leader: Arc::clone(&is_leader),
    });

    #[cfg(feature = "metrics")]
    {
        let server_state = state.clone();
        let port = args.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = workload_apps_operator::rest_api::run_server(server_state, port).await {
                tracing::error!("Metrics server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    controller::run_controller(state).await
}

const LEASE_NAME: &str = "cluster-apps-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get(LEASE_NAME).await {
        Ok(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| {
                    let duration = spec
                        .and_then(|s| s.lease_duration_seconds)
                        .unwrap_or(LEASE_DURATION_SECS);
                    let expiry = renew.0 + chrono::Duration::seconds(i64::from(duration));
                    now > expiry
                })
                .unwrap_or(true);

            if expired {
                info!(
                    "Lease held by {:?} has expired, taking over",
                    current_holder
                );
                let patch = serde_json::json!({
                    "spec": {
                        "holderIdentity": identity,
                        "acquireTime": MicroTime(now),
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: Some(k8s_openapi::api::coordination::v1::LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            leases.create(&PostParams::default(), &lease).await?;
            info!("Created lease {} with holder {}", LEASE_NAME, identity);
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
