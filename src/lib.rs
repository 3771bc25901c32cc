//! Workload apps operator
//!
//! Kubernetes operator that installs the platform apps of every Cluster API
//! workload cluster and tears them down in dependency order when the cluster
//! is deleted.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;

#[cfg(feature = "metrics")]
pub mod rest_api;

pub use crate::config::OperatorConfig;
pub use crate::error::{Error, Result};
