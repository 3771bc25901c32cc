//! Resource definitions consumed and produced by the operator
//!
//! `Cluster` is the reconciled input, `App` the managed unit. `AppCatalog`
//! and `Release` are read to resolve chart names and versions.

mod app;
mod catalog;
mod cluster;
mod release;
pub mod types;


pub use app::{App, AppConfig, AppKubeConfig, AppSpec, AppUserConfig, KubeConfigContext};
pub use catalog::{AppCatalog, AppCatalogSpec, CatalogStorage};
pub use cluster::{ApiEndpoint, Cluster, ClusterNetwork, ClusterSpec, ClusterStatus, NetworkRanges};
pub use release::{Release, ReleaseSpec, ReleaseSpecApp, ReleaseSpecComponent};
pub use types::*;
