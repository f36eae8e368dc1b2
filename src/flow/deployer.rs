// ABOUTME: Deployer flow: selects ready workers and records deploy success or failure.
// ABOUTME: Failures consume a bounded attempt budget before turning terminal.

use crate::store::{Keyspace, StoreError, WaitingMarker};
use crate::types::{Hostname, WorkerErrorKind, WorkerId};

/// Outcome of recording a failed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployFailure {
    /// Budget left; the waiter hands the worker back after the retry wait.
    Retry { attempt: i64 },
    /// Budget exhausted; every hostname now carries `FAILED_TO_DEPLOY`.
    Exhausted { attempt: i64 },
}

pub struct DeployerFlow {
    keys: Keyspace,
    max_attempts: i64,
}

impl DeployerFlow {
    pub fn new(keys: Keyspace, max_attempts: i64) -> Self {
        Self { keys, max_attempts }
    }

    /// Workers ready for deployment that are not already being deployed.
    pub async fn candidates(&self) -> Result<Vec<WorkerId>, StoreError> {
        let mut candidates = Vec::new();
        for worker_id in self.keys.worker_ready_for_deployment().ids().await? {
            if self
                .keys
                .worker_waiting_for_deployment()
                .exists(&worker_id)
                .await?
            {
                continue;
            }
            candidates.push(worker_id);
        }
        Ok(candidates)
    }

    /// Whether the ready marker still reflects outstanding work.
    ///
    /// A deployment is owed only while the worker is force-updated or one of
    /// its hostnames still awaits initialization. Anything else means another
    /// loop already finished or superseded it.
    pub async fn is_legitimate(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
    ) -> Result<bool, StoreError> {
        if self.keys.worker_force_update().exists(worker_id).await? {
            return Ok(true);
        }
        self.keys.any_hostname_initializing(hostnames).await
    }

    /// A hard force-delete forbids deploying; the deleter owns the worker.
    pub async fn is_suppressed(&self, worker_id: &WorkerId) -> Result<bool, StoreError> {
        self.keys.deployment_suppressed(worker_id).await
    }

    pub async fn drop_stale(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        tracing::info!(worker_id = %worker_id, "dropping superseded ready marker");
        self.keys
            .worker_ready_for_deployment()
            .delete(worker_id)
            .await?;
        Ok(())
    }

    /// Hand a deployed worker to the waiter. The ready timestamp stays as the
    /// start of the wait.
    pub async fn record_success(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        self.keys
            .set_waiting_for_deployment(worker_id, WaitingMarker::Deploying)
            .await
    }

    pub async fn record_failure(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
    ) -> Result<DeployFailure, StoreError> {
        let attempt = self
            .keys
            .worker_deployment_error_attempt()
            .incr(worker_id)
            .await?;
        if attempt < self.max_attempts {
            self.keys
                .set_waiting_for_deployment(worker_id, WaitingMarker::RetryAfterError)
                .await?;
            return Ok(DeployFailure::Retry { attempt });
        }
        self.keys
            .set_worker_error(worker_id, hostnames, WorkerErrorKind::FailedToDeploy)
            .await?;
        Ok(DeployFailure::Exhausted { attempt })
    }
}
