//! Prometheus metrics for the workload apps operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `cluster_apps_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `cluster_apps_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `cluster_apps_dangling_apps` (gauge): tenant apps still blocking a cluster teardown.
//! - `cluster_apps_teardown_phase` (gauge): ordinal of the teardown phase a cluster is waiting in.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "cluster"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "validation", "not_found"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub cluster_id: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking tenant apps a teardown is still waiting on
pub static DANGLING_APPS: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the teardown phase ordinal per cluster
pub static TEARDOWN_PHASE: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "cluster_apps_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    // The counter encoder appends the `_total` suffix.
    registry.register(
        "cluster_apps_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "cluster_apps_dangling_apps",
        "Tenant apps still blocking the teardown of a cluster",
        DANGLING_APPS.clone(),
    );
    registry.register(
        "cluster_apps_teardown_phase",
        "Teardown phase a deleting cluster is waiting in",
        TEARDOWN_PHASE.clone(),
    );

    registry
});

fn cluster_labels(cluster_id: &str) -> ClusterLabels {
    ClusterLabels {
        cluster_id: cluster_id.to_string(),
    }
}

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_dangling_apps(cluster_id: &str, count: usize) {
    DANGLING_APPS
        .get_or_create(&cluster_labels(cluster_id))
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn set_teardown_phase(cluster_id: &str, ordinal: i64) {
    TEARDOWN_PHASE
        .get_or_create(&cluster_labels(cluster_id))
        .set(ordinal);
}

/// Drops the per-cluster series once a cluster is released.
pub fn forget_cluster(cluster_id: &str) {
    let labels = cluster_labels(cluster_id);
    DANGLING_APPS.remove(&labels);
    TEARDOWN_PHASE.remove(&labels);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn rendered() -> String {
        let mut out = String::new();
        encode(&mut out, &REGISTRY).unwrap();
        out
    }

    #[test]
    fn registry_exports_all_families() {
        observe_reconcile_duration_seconds("cluster", 0.25);
        inc_reconcile_error("cluster", "validation");

        let text = rendered();
        assert!(text.contains("cluster_apps_reconcile_duration_seconds"));
        assert!(text.contains(
            r#"cluster_apps_reconcile_errors_total{controller="cluster",kind="validation"}"#
        ));
        assert!(text.contains("cluster_apps_dangling_apps"));
        assert!(text.contains("cluster_apps_teardown_phase"));
    }

    #[test]
    fn cluster_gauges_are_set_and_forgotten() {
        set_dangling_apps("metrics-test0", 3);
        set_teardown_phase("metrics-test0", 2);

        let text = rendered();
        assert!(text.contains(r#"cluster_apps_dangling_apps{cluster_id="metrics-test0"} 3"#));
        assert!(text.contains(r#"cluster_apps_teardown_phase{cluster_id="metrics-test0"} 2"#));

        forget_cluster("metrics-test0");
        assert!(!rendered().contains("metrics-test0"));
    }
}
