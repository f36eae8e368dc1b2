// ABOUTME: Updater flow: age, revision and activity rules over listed releases.
// ABOUTME: Decides forced updates and deletes; skips workers already being acted on.

use crate::backend::{Release, ReleaseStatus};
use crate::config::UpdaterConfig;
use crate::store::{ForceDelete, Keyspace, StoreError};
use crate::types::WorkerId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// First deploy stuck in a pending state.
    RetryPending,
    /// Release has not been updated for too long.
    Refresh,
    /// No tenant activity within the idle grace period.
    DeleteIdle,
}

impl UpdateAction {
    pub fn is_delete(&self) -> bool {
        matches!(self, UpdateAction::DeleteIdle)
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateAction::RetryPending => "retry pending release",
            UpdateAction::Refresh => "refresh aged release",
            UpdateAction::DeleteIdle => "delete idle release",
        };
        write!(f, "{s}")
    }
}

pub struct UpdaterFlow {
    keys: Keyspace,
    config: UpdaterConfig,
}

impl UpdaterFlow {
    pub fn new(keys: Keyspace, config: UpdaterConfig) -> Self {
        Self { keys, config }
    }

    /// Pick the action a release calls for, if any.
    ///
    /// `last_action` is the tenant's latest recorded activity; without one the
    /// release's own update time stands in for it.
    pub fn decide(
        &self,
        release: &Release,
        last_action: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<UpdateAction> {
        let age = elapsed(release.updated, now);
        if release.status.is_pending() {
            if age > self.config.pending_grace
                && release.revision <= self.config.pending_max_revision
            {
                return Some(UpdateAction::RetryPending);
            }
            return None;
        }
        if release.status != ReleaseStatus::Deployed {
            return None;
        }
        let idle = elapsed(last_action.unwrap_or(release.updated), now);
        if idle > self.config.idle_grace {
            return Some(UpdateAction::DeleteIdle);
        }
        if age > self.config.max_age {
            return Some(UpdateAction::Refresh);
        }
        None
    }

    /// Whether another force marker or an in-flight deployment already
    /// covers the worker.
    pub async fn is_busy(&self, worker_id: &WorkerId) -> Result<bool, StoreError> {
        Ok(self.keys.worker_force_update().exists(worker_id).await?
            || self.keys.worker_force_delete().exists(worker_id).await?
            || self.keys.worker_ready_for_deployment().exists(worker_id).await?
            || self
                .keys
                .worker_waiting_for_deployment()
                .exists(worker_id)
                .await?)
    }

    pub async fn apply(&self, worker_id: &WorkerId, action: UpdateAction) -> Result<(), StoreError> {
        match action {
            UpdateAction::RetryPending | UpdateAction::Refresh => {
                self.keys.set_force_update(worker_id).await
            }
            UpdateAction::DeleteIdle => {
                self.keys
                    .set_force_delete(worker_id, ForceDelete { allow_cancel: true })
                    .await
            }
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
