//! `AppCatalog` resource pointing at a Helm repository

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "AppCatalog",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".spec.storage.URL"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppCatalogSpec {
    #[serde(default)]
    pub title: String,

    pub storage: CatalogStorage,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CatalogStorage {
    #[serde(rename = "type", default)]
    pub type_: String,

    #[serde(rename = "URL")]
    pub url: String,
}
