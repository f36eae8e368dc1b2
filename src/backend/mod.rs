// ABOUTME: Deployment backend contract consumed by the reconciliation loops.
// ABOUTME: Create, probe, list and delete per-worker cluster workloads.

mod error;
mod helm;
mod spec;

pub use error::{BackendError, BackendErrorKind};
pub use helm::{HelmBackend, parse_helm_time};
pub use spec::{DeploymentSpec, merge_values, volume_values};

use crate::types::Namespace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Operations on per-worker workloads. Every operation is idempotent.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Prepare the namespace a deployment will live in.
    async fn init(&self, spec: &DeploymentSpec) -> Result<(), BackendError>;

    /// Install or upgrade the workload.
    async fn deploy(&self, spec: &DeploymentSpec) -> Result<(), BackendError>;

    async fn is_ready(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
    ) -> Result<bool, BackendError>;

    /// Address the workload is reachable at once ready.
    async fn get_hostname(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
    ) -> Result<String, BackendError>;

    /// Live request against a resolved address.
    async fn verify_access(&self, address: &str) -> Result<bool, BackendError>;

    async fn delete(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
        options: DeleteOptions,
    ) -> Result<(), BackendError>;

    async fn list_releases(&self) -> Result<Vec<Release>, BackendError>;
}

/// Which parts of a deployment to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub delete_namespace: bool,
    pub delete_release: bool,
}

/// A release as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    /// Raw namespace; may belong to something this operator does not manage.
    pub namespace: String,
    pub updated: DateTime<Utc>,
    pub status: ReleaseStatus,
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Failed,
    Other(String),
}

impl ReleaseStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "deployed" => ReleaseStatus::Deployed,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            "failed" => ReleaseStatus::Failed,
            other => ReleaseStatus::Other(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
        )
    }
}
