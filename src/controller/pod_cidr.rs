//! Pod CIDR of a workload cluster

use async_trait::async_trait;
use kube::ResourceExt;

#[cfg(test)]
use mockall::automock;

use crate::crd::Cluster;
use crate::error::{Error, Result};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodCidrSource: Send + Sync {
    /// `Error::NotFound` means the CIDR is not known yet.
    async fn pod_cidr(&self, cluster: &Cluster) -> Result<String>;
}

/// Reads the first pod CIDR block of the cluster network, falling back to
/// the operator-wide default.
#[derive(Clone, Debug, Default)]
pub struct ClusterPodCidr {
    default_cidr: String,
}

impl ClusterPodCidr {
    pub fn new(default_cidr: impl Into<String>) -> Self {
        Self {
            default_cidr: default_cidr.into(),
        }
    }
}

#[async_trait]
impl PodCidrSource for ClusterPodCidr {
    async fn pod_cidr(&self, cluster: &Cluster) -> Result<String> {
        if let Some(block) = cluster.spec.pod_cidr_blocks().first() {
            return Ok(block.clone());
        }
        if !self.default_cidr.is_empty() {
            return Ok(self.default_cidr.clone());
        }
        Err(Error::not_found("pod CIDR", cluster.name_any()))
    }
}
