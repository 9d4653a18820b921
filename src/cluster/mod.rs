pub mod proxmox;
pub mod types;

use async_trait::async_trait;

use crate::errors::{BalancerResult, MigrationError};

pub use proxmox::ProxmoxClient;
pub use types::{ClusterSnapshot, MigrationRequest, NodeMetrics, VmMetrics};

/// The cluster the balancer reads from and migrates on.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Make sure the API session is usable before a cycle starts. Clusters
    /// whose sessions never expire have nothing to do.
    async fn refresh_session(&self) -> BalancerResult<()> {
        Ok(())
    }

    /// Fresh node and VM metrics for one cycle.
    async fn snapshot(&self) -> BalancerResult<ClusterSnapshot>;

    /// Ask the cluster to live-migrate one VM. Returns the task id.
    async fn migrate(&self, request: &MigrationRequest) -> Result<String, MigrationError>;
}
