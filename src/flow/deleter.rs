// ABOUTME: Deleter flow: decides whether a force-deleted worker may be torn down.
// ABOUTME: A cancelable delete yields to a hostname that re-entered initialization.

use crate::store::{ForceDelete, Keyspace, StoreError};
use crate::types::{Hostname, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDecision {
    Proceed(ForceDelete),
    /// Initialization resumed; deletion waits for the next pass.
    Cancelled,
    /// Marker disappeared since enumeration.
    Gone,
}

pub struct DeleterFlow {
    keys: Keyspace,
}

impl DeleterFlow {
    pub fn new(keys: Keyspace) -> Self {
        Self { keys }
    }

    pub async fn candidates(&self) -> Result<Vec<WorkerId>, StoreError> {
        self.keys.worker_force_delete().ids().await
    }

    pub async fn decide(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
    ) -> Result<DeleteDecision, StoreError> {
        let Some(marker) = self.keys.force_delete(worker_id).await? else {
            return Ok(DeleteDecision::Gone);
        };
        if marker.allow_cancel && self.keys.any_hostname_initializing(hostnames).await? {
            tracing::info!(worker_id = %worker_id, "deletion deferred, hostname awaiting initialization");
            return Ok(DeleteDecision::Cancelled);
        }
        Ok(DeleteDecision::Proceed(marker))
    }

    /// Remove every key of the worker and its hostnames.
    pub async fn clear(&self, worker_id: &WorkerId, hostnames: &[Hostname]) -> Result<(), StoreError> {
        self.keys.del_worker_keys(worker_id, hostnames).await
    }

    /// Re-arm the marker after the backend failed to delete, so the next pass
    /// retries instead of leaking the workload.
    pub async fn rearm(&self, worker_id: &WorkerId, marker: ForceDelete) -> Result<(), StoreError> {
        self.keys.set_force_delete(worker_id, marker).await
    }
}
