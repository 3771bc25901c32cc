//! Object store access
//!
//! [`AppStore`] is the narrow set of API server operations the reconcile
//! steps need. [`KubeStore`] implements it over `kube::Api`. Not-found and
//! already-exists responses are returned as `Error::KubeError` unchanged;
//! only the callers decide whether they are benign.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::crd::App;
use crate::error::Result;

use super::keys::PROJECT_NAME;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
}

/// Equality-based label selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn not_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::NotEquals(key.into(), value.into()));
        self
    }

    /// Evaluates the selector the way the API server does: `key!=value`
    /// also matches objects without the key.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
        })
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|req| match req {
                Requirement::Equals(k, v) => format!("{k}={v}"),
                Requirement::NotEquals(k, v) => format!("{k}!={v}"),
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}

#[async_trait]
pub trait AppStore: Send + Sync {
    async fn list_apps(&self, namespace: &str, selector: &Selector) -> Result<Vec<App>>;

    async fn get_app(&self, namespace: &str, name: &str) -> Result<App>;

    async fn create_app(&self, app: &App) -> Result<()>;

    /// JSON merge patch (RFC 7386)
    async fn patch_app(&self, namespace: &str, name: &str, patch: &serde_json::Value)
        -> Result<()>;

    async fn delete_app(&self, namespace: &str, name: &str) -> Result<()>;

    /// Returns false when the finalizer was already absent.
    async fn remove_app_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<bool>;

    async fn list_config_map_names(&self, namespace: &str) -> Result<BTreeSet<String>>;

    async fn list_secret_names(&self, namespace: &str) -> Result<BTreeSet<String>>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    async fn apply_secret(&self, secret: &Secret) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_secret_data(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, Vec<u8>>>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Reads an arbitrary namespaced object, e.g. a provider cluster or a
    /// control plane, as JSON.
    async fn get_dynamic(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value>;

    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// [`AppStore`] backed by the API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn apps(&self, namespace: &str) -> Api<App> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AppStore for KubeStore {
    async fn list_apps(&self, namespace: &str, selector: &Selector) -> Result<Vec<App>> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = self.apps(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn get_app(&self, namespace: &str, name: &str) -> Result<App> {
        Ok(self.apps(namespace).get(name).await?)
    }

    async fn create_app(&self, app: &App) -> Result<()> {
        let namespace = app.namespace().unwrap_or_default();
        self.apps(&namespace)
            .create(&PostParams::default(), app)
            .await?;
        Ok(())
    }

    async fn patch_app(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.apps(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete_app(&self, namespace: &str, name: &str) -> Result<()> {
        self.apps(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn remove_app_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<bool> {
        let api = self.apps(namespace);
        let app = api.get(name).await?;
        if !app.finalizers().iter().any(|f| f == finalizer) {
            return Ok(false);
        }

        let remaining: Vec<&String> = app.finalizers().iter().filter(|f| *f != finalizer).collect();
        // resourceVersion turns the merge patch into a conditional update.
        let patch = json!({
            "metadata": {
                "finalizers": remaining,
                "resourceVersion": app.resource_version(),
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Removed finalizer {} from App {}/{}", finalizer, namespace, name);
        Ok(true)
    }

    async fn list_config_map_names(&self, namespace: &str) -> Result<BTreeSet<String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list_metadata(&ListParams::default()).await?;
        Ok(list.items.iter().map(|m| m.name_any()).collect())
    }

    async fn list_secret_names(&self, namespace: &str) -> Result<BTreeSet<String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list_metadata(&ListParams::default()).await?;
        Ok(list.items.iter().map(|m| m.name_any()).collect())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let namespace = config_map.namespace().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &config_map.name_any(),
            &PatchParams::apply(PROJECT_NAME).force(),
            &Patch::Apply(config_map),
        )
        .await?;
        Ok(())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = secret.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &secret.name_any(),
            &PatchParams::apply(PROJECT_NAME).force(),
            &Patch::Apply(secret),
        )
        .await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace).await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_dynamic(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value> {
        let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let object = api.get(name).await?;
        Ok(serde_json::to_value(object)?)
    }

    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }
}
