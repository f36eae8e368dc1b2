// ABOUTME: Waiter flow: tracks deployments in progress until available or timed out.
// ABOUTME: A timed-out retry marker hands the worker back to the initializer.

use crate::config::WaiterConfig;
use crate::store::{Keyspace, StoreError, WaitingMarker};
use crate::types::{Hostname, WorkerErrorKind, WorkerId};
use chrono::{DateTime, Utc};

/// Bookkeeping state of a waiting worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Waiting marker without a ready marker; the marker was removed.
    Stale,
    /// Marker disappeared since enumeration.
    Gone,
    /// A hard force-delete is pending; left for the deleter.
    Suppressed,
    Waiting {
        since: DateTime<Utc>,
        marker: WaitingMarker,
    },
}

pub struct WaiterFlow {
    keys: Keyspace,
    config: WaiterConfig,
}

impl WaiterFlow {
    pub fn new(keys: Keyspace, config: WaiterConfig) -> Self {
        Self { keys, config }
    }

    pub async fn candidates(&self) -> Result<Vec<WorkerId>, StoreError> {
        self.keys.worker_waiting_for_deployment().ids().await
    }

    pub async fn check(&self, worker_id: &WorkerId) -> Result<WaitState, StoreError> {
        let Some(marker) = self.keys.waiting_for_deployment(worker_id).await? else {
            return Ok(WaitState::Gone);
        };
        if self.keys.deployment_suppressed(worker_id).await? {
            tracing::debug!(worker_id = %worker_id, "wait suppressed by force delete");
            return Ok(WaitState::Suppressed);
        }
        match self.keys.ready_for_deployment_since(worker_id).await? {
            Some(since) => Ok(WaitState::Waiting { since, marker }),
            None => {
                tracing::warn!(worker_id = %worker_id, "waiting marker without ready marker, removing");
                self.keys
                    .worker_waiting_for_deployment()
                    .delete(worker_id)
                    .await?;
                Ok(WaitState::Stale)
            }
        }
    }

    /// Whether the wait that started at `since` has run out.
    pub fn timed_out(&self, since: DateTime<Utc>, marker: WaitingMarker, now: DateTime<Utc>) -> bool {
        let limit = match marker {
            WaitingMarker::Deploying => self.config.max_wait,
            WaitingMarker::RetryAfterError => self.config.retry_wait,
        };
        let elapsed = (now - since).to_std().unwrap_or_default();
        elapsed > limit
    }

    pub fn verify_access(&self) -> bool {
        self.config.verify_access
    }

    pub async fn mark_available(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
        address: &str,
    ) -> Result<(), StoreError> {
        self.keys
            .set_worker_available(worker_id, hostnames, address)
            .await?;
        tracing::info!(worker_id = %worker_id, address = %address, "worker available");
        Ok(())
    }

    /// Act on an expired wait.
    ///
    /// Returns the error kind when the worker turned terminal, `None` when it
    /// was handed back for another attempt.
    pub async fn expire(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
        marker: WaitingMarker,
    ) -> Result<Option<WorkerErrorKind>, StoreError> {
        match marker {
            WaitingMarker::RetryAfterError => {
                // force_update first: it keeps the worker owed a deployment
                // if we stop between the writes.
                self.keys.set_force_update(worker_id).await?;
                self.keys
                    .worker_waiting_for_deployment()
                    .delete(worker_id)
                    .await?;
                self.keys
                    .worker_ready_for_deployment()
                    .delete(worker_id)
                    .await?;
                tracing::info!(worker_id = %worker_id, "retrying failed deployment");
                Ok(None)
            }
            WaitingMarker::Deploying => {
                let kind = WorkerErrorKind::TimeoutWaitingForDeployment;
                self.keys
                    .set_worker_error(worker_id, hostnames, kind)
                    .await?;
                tracing::warn!(worker_id = %worker_id, "timed out waiting for deployment");
                Ok(Some(kind))
            }
        }
    }
}
