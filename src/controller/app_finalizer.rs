//! Finalizer sweep
//!
//! Once the platform agent is gone nothing will remove its finalizer from
//! the Apps it used to reconcile. The sweep strips it from Apps already
//! marked for deletion and reports the ones that were never deleted.

use kube::ResourceExt;
use tracing::{info, warn};

use crate::error::Result;

use super::keys;
use super::store::{AppStore, Selector};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Apps whose platform agent finalizer was removed
    pub released: Vec<String>,
    /// Apps without a deletion timestamp, left untouched
    pub pending: Vec<String>,
}

impl SweepOutcome {
    /// Whether the cluster must keep its own finalizer
    pub fn keep_finalizer(&self) -> bool {
        !self.pending.is_empty()
    }
}

pub async fn sweep_app_finalizers(
    store: &dyn AppStore,
    cluster_id: &str,
    namespace: &str,
) -> Result<SweepOutcome> {
    let selector = Selector::new()
        .eq(keys::LABEL_CLUSTER, cluster_id)
        .not_eq(keys::LABEL_APP_NAME, keys::APP_OPERATOR);
    let apps = store.list_apps(namespace, &selector).await?;

    let mut outcome = SweepOutcome::default();
    for app in apps {
        let name = app.name_any();
        if !keys::is_deleting(&app) {
            outcome.pending.push(name);
            continue;
        }

        match store
            .remove_app_finalizer(namespace, &name, keys::APP_OPERATOR_APP_FINALIZER)
            .await
        {
            Ok(true) => {
                info!("Removed finalizer from App {}/{}", namespace, name);
                outcome.released.push(name);
            }
            Ok(false) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if outcome.keep_finalizer() {
        warn!(
            "{} app(s) of cluster {} are not deleted yet: {}",
            outcome.pending.len(),
            cluster_id,
            outcome.pending.join(", ")
        );
    }
    Ok(outcome)
}
