//! Controller module for Cluster reconciliation
//! This module contains the main controller loop, the desired-state compiler,
//! the App diff engine and the ordered teardown of a cluster's Apps.

pub mod keys;
pub mod store;

pub mod app_finalizer;
pub mod apply;
pub mod chart_name;
pub mod config_artifacts;
pub mod desired;
#[cfg(test)]
mod desired_test;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod namespace;
pub mod pod_cidr;
pub mod provider;
mod reconciler;
pub mod release;
pub mod retry;
pub mod teardown;
pub mod values;
pub mod version_label;

pub use apply::{apply_apps, ApplyOutcome};
pub use desired::{Compiled, Compiler};
pub use finalizers::CLUSTER_APPS_FINALIZER;
pub use provider::{ProviderFacts, ProviderKind};
pub use reconciler::{apply_cluster, cleanup_cluster, run_controller, ControllerState, ReconcileContext};
pub use store::{AppStore, KubeStore, Selector};
pub use teardown::{Teardown, TeardownPhase, TeardownStep};
