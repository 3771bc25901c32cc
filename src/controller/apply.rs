//! Diff & apply engine for managed Apps
//!
//! Current Apps are matched to desired ones by name and namespace. Missing
//! Apps are created; changed ones receive a JSON merge patch covering labels,
//! annotations and spec. Applying the same desired set twice is a no-op.

use std::collections::{BTreeMap, HashMap};

use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::crd::App;
use crate::error::{is_kube_already_exists, Error, Result};

use super::keys;
use super::store::{AppStore, Selector};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: usize,
}

impl ApplyOutcome {
    pub fn mutations(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

/// Desired annotations, plus current values of the allow-listed keys other
/// controllers write back, unless desired sets those keys itself.
pub fn merge_annotations(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = desired.clone();
    for key in keys::PRESERVED_ANNOTATIONS {
        if let Some(value) = current.get(*key) {
            merged
                .entry((*key).to_string())
                .or_insert_with(|| value.clone());
        }
    }
    merged
}

/// RFC 7386 merge patch turning `current` into `desired`, or `None` when
/// they are equal. Keys absent from `desired` are removed.
pub fn json_merge_diff(current: &Value, desired: &Value) -> Option<Value> {
    match (current, desired) {
        (Value::Object(cur), Value::Object(want)) => {
            let mut patch = Map::new();
            for (key, want_value) in want {
                match cur.get(key) {
                    Some(cur_value) => {
                        if let Some(diff) = json_merge_diff(cur_value, want_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), want_value.clone());
                    }
                }
            }
            for key in cur.keys() {
                if !want.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if current == desired => None,
        _ => Some(desired.clone()),
    }
}

fn patchable_view(
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    app: &App,
) -> Result<Value> {
    Ok(json!({
        "metadata": {
            "labels": labels,
            "annotations": annotations,
        },
        "spec": serde_json::to_value(&app.spec)?,
    }))
}

/// Merge patch bringing `current` in line with `desired`, or `None` if it
/// already is.
pub fn update_patch(current: &App, desired: &App) -> Result<Option<Value>> {
    let annotations = merge_annotations(current.annotations(), desired.annotations());

    let labels_changed = current.labels() != desired.labels();
    let annotations_changed = current.annotations() != &annotations;
    let spec_changed = current.spec != desired.spec;
    if !(labels_changed || annotations_changed || spec_changed) {
        return Ok(None);
    }

    let before = patchable_view(current.labels(), current.annotations(), current)?;
    let after = patchable_view(desired.labels(), &annotations, desired)?;
    Ok(json_merge_diff(&before, &after))
}

/// Creates or patches every desired App among those we manage for the
/// cluster.
pub async fn apply_apps(
    store: &dyn AppStore,
    cluster_id: &str,
    namespace: &str,
    desired: &[App],
) -> Result<ApplyOutcome> {
    let selector = Selector::new()
        .eq(keys::LABEL_CLUSTER, cluster_id)
        .eq(keys::LABEL_MANAGED_BY, keys::PROJECT_NAME);
    let current: HashMap<(String, String), App> = store
        .list_apps(namespace, &selector)
        .await?
        .into_iter()
        .map(|app| ((app.namespace().unwrap_or_default(), app.name_any()), app))
        .collect();

    let mut outcome = ApplyOutcome::default();

    for app in desired {
        let name = app.name_any();
        let app_namespace = app.namespace().unwrap_or_else(|| namespace.to_string());

        match current.get(&(app_namespace.clone(), name.clone())) {
            None => {
                match store.create_app(app).await {
                    Ok(()) => info!("Created App {}/{}", app_namespace, name),
                    Err(Error::KubeError(e)) if is_kube_already_exists(&e) => {
                        debug!("App {}/{} already exists", app_namespace, name);
                    }
                    Err(e) => return Err(e),
                }
                outcome.created.push(name);
            }
            Some(existing) => match update_patch(existing, app)? {
                Some(patch) => {
                    store.patch_app(&app_namespace, &name, &patch).await?;
                    info!("Updated App {}/{}", app_namespace, name);
                    outcome.updated.push(name);
                }
                None => outcome.unchanged += 1,
            },
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    use crate::controller::store::fake::MemoryStore;
    use crate::crd::AppSpec;

    const LATEST_CONFIGMAP: &str = "app-operator.giantswarm.io/latest-configmap-version";

    fn desired(name: &str, version: &str) -> App {
        let mut labels = keys::managed_labels("demo0");
        labels.insert(keys::LABEL_APP_NAME.to_string(), name.to_string());
        App {
            metadata: ObjectMeta {
                name: Some(format!("demo0-{name}")),
                namespace: Some("org-acme".into()),
                labels: Some(labels),
                annotations: Some(BTreeMap::from([(
                    keys::ANNOTATION_FORCE_HELM_UPGRADE.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            spec: AppSpec {
                catalog: "default".into(),
                name: format!("{name}-app"),
                namespace: "kube-system".into(),
                version: version.into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn preserved_annotation_survives_merge() {
        let current = BTreeMap::from([
            (LATEST_CONFIGMAP.to_string(), "3".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ]);
        let desired = BTreeMap::from([("a".to_string(), "1".to_string())]);

        let merged = merge_annotations(&current, &desired);
        assert_eq!(merged[LATEST_CONFIGMAP], "3");
        assert_eq!(merged["a"], "1");
        assert!(!merged.contains_key("unrelated"));
    }

    #[test]
    fn desired_value_wins_for_preserved_key() {
        let current = BTreeMap::from([(LATEST_CONFIGMAP.to_string(), "3".to_string())]);
        let desired = BTreeMap::from([(LATEST_CONFIGMAP.to_string(), "4".to_string())]);
        assert_eq!(merge_annotations(&current, &desired)[LATEST_CONFIGMAP], "4");
    }

    #[test]
    fn merge_diff_removes_and_replaces() {
        let current = json!({ "a": 1, "b": { "c": 2, "d": 3 }, "gone": true });
        let desired = json!({ "a": 1, "b": { "c": 5, "d": 3 }, "new": "x" });
        assert_eq!(
            json_merge_diff(&current, &desired),
            Some(json!({ "b": { "c": 5 }, "new": "x", "gone": null }))
        );
        assert_eq!(json_merge_diff(&desired, &desired), None);
    }

    #[test]
    fn only_preserved_annotation_difference_is_unchanged() {
        let want = desired("coredns", "1.21.0");
        let mut current = want.clone();
        current
            .annotations_mut()
            .insert(LATEST_CONFIGMAP.to_string(), "3".to_string());
        assert_eq!(update_patch(&current, &want).unwrap(), None);
    }

    #[tokio::test]
    async fn creates_then_converges() {
        let store = MemoryStore::new();
        let apps = vec![desired("coredns", "1.21.0"), desired("cert-exporter", "2.9.0")];

        let first = apply_apps(&store, "demo0", "org-acme", &apps).await.unwrap();
        assert_eq!(first.created.len(), 2);

        store.clear_log();
        let second = apply_apps(&store, "demo0", "org-acme", &apps).await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(second.unchanged, 2);
        assert!(store.log().is_empty());
    }

    #[tokio::test]
    async fn patch_keeps_preserved_annotation() {
        let store = MemoryStore::new();
        let mut current = desired("coredns", "1.20.0");
        current
            .annotations_mut()
            .insert(LATEST_CONFIGMAP.to_string(), "3".to_string());
        store.insert_app(current);

        let outcome = apply_apps(&store, "demo0", "org-acme", &[desired("coredns", "1.21.0")])
            .await
            .unwrap();
        assert_eq!(outcome.updated, ["demo0-coredns"]);

        let patched = store.app("org-acme", "demo0-coredns").unwrap();
        assert_eq!(patched.spec.version, "1.21.0");
        assert_eq!(patched.annotations()[LATEST_CONFIGMAP], "3");
    }

    #[tokio::test]
    async fn unmanaged_namesake_counts_as_created() {
        let store = MemoryStore::new();
        let mut foreign = desired("coredns", "1.0.0");
        foreign.labels_mut().remove(keys::LABEL_MANAGED_BY);
        store.insert_app(foreign);

        let outcome = apply_apps(&store, "demo0", "org-acme", &[desired("coredns", "1.21.0")])
            .await
            .unwrap();
        assert_eq!(outcome.created, ["demo0-coredns"]);
        assert_eq!(
            store.app("org-acme", "demo0-coredns").unwrap().spec.version,
            "1.0.0"
        );
    }
}
