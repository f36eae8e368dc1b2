// ABOUTME: Initializer flow: promotes awaiting hostnames and force-updated workers to ready.
// ABOUTME: Applies the retry budget, zone, ownership and duplicate-config checks in order.

use super::FlowError;
use crate::store::{Keyspace, StoreError};
use crate::types::{Hostname, WorkerErrorKind, WorkerId};
use crate::volume_config::VolumeConfig;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

/// What happened to one hostname in an initializer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Worker marked ready for deployment.
    Ready(WorkerId),
    /// Worker is already ready or deploying; nothing to do.
    InFlight(WorkerId),
    /// Resolution failed; the hostname stays pending.
    Retrying { attempt: i64 },
    /// A terminal error was recorded on the hostname.
    Failed(WorkerErrorKind),
    /// A non-cancelable force delete holds the worker back.
    Suppressed(WorkerId),
}

pub struct InitializerFlow {
    keys: Keyspace,
    zone: String,
    max_error_attempts: i64,
    /// Configs accepted so far, for duplicate detection. A flow lives for
    /// one pass.
    seen: BTreeMap<WorkerId, VolumeConfig>,
}

impl InitializerFlow {
    pub fn new(keys: Keyspace, zone: impl Into<String>, max_error_attempts: i64) -> Self {
        Self {
            keys,
            zone: zone.into(),
            max_error_attempts,
            seen: BTreeMap::new(),
        }
    }

    /// Workers flagged for forced update that are not already in flight.
    pub async fn force_update_candidates(&self) -> Result<Vec<WorkerId>, StoreError> {
        let mut candidates = Vec::new();
        for worker_id in self.keys.worker_force_update().ids().await? {
            if self.is_in_flight(&worker_id).await? {
                continue;
            }
            candidates.push(worker_id);
        }
        Ok(candidates)
    }

    /// Config accepted for a worker earlier in this pass.
    pub fn accepted(&self, worker_id: &WorkerId) -> Option<&VolumeConfig> {
        self.seen.get(worker_id)
    }

    /// Hostnames awaiting initialization, in sorted order.
    pub async fn awaiting_hostnames(&self) -> Result<Vec<Hostname>, StoreError> {
        self.keys.initializing_hostnames().await
    }

    /// Route a force-updated worker back through initialization.
    ///
    /// Every hostname the worker had or now has is flagged as awaiting
    /// initialization before `force_update` is cleared, so an interruption
    /// leaves a state the next pass picks up through the hostname route.
    pub async fn reroute_forced(
        &self,
        worker_id: &WorkerId,
        previous: &[Hostname],
        refreshed: &VolumeConfig,
    ) -> Result<BTreeSet<Hostname>, StoreError> {
        let covered: BTreeSet<Hostname> = previous
            .iter()
            .chain(refreshed.hostnames.iter())
            .cloned()
            .collect();
        for hostname in &covered {
            self.keys.hostname_initialize().set(hostname, "").await?;
        }
        if covered.is_empty() {
            tracing::warn!(worker_id = %worker_id, "force update for worker without hostnames dropped");
        }
        self.keys.worker_force_update().delete(worker_id).await?;
        Ok(covered)
    }

    /// Apply the initialization checks to one hostname and its resolved config.
    pub async fn advance(
        &mut self,
        hostname: &Hostname,
        config: &VolumeConfig,
    ) -> Result<InitOutcome, FlowError> {
        let worker_id = match (&config.worker_id, config.is_error()) {
            (Some(worker_id), false) => worker_id.clone(),
            _ => return self.resolution_failed(hostname, config).await,
        };

        if !config.hostnames.contains(hostname) {
            tracing::warn!(hostname = %hostname, worker_id = %worker_id, "hostname not listed in volume config");
            return self.fail(hostname, WorkerErrorKind::InvalidHostname).await;
        }

        let force_delete = self.keys.force_delete(&worker_id).await?;
        if force_delete.is_some_and(|marker| marker.suppresses_deployment()) {
            tracing::debug!(hostname = %hostname, worker_id = %worker_id, "deployment suppressed by force delete");
            return Ok(InitOutcome::Suppressed(worker_id));
        }

        if config.zone.as_deref() != Some(self.zone.as_str()) {
            tracing::warn!(
                hostname = %hostname,
                worker_id = %worker_id,
                zone = ?config.zone,
                cluster_zone = %self.zone,
                "volume zone does not match cluster"
            );
            return self.fail(hostname, WorkerErrorKind::InvalidVolumeZone).await;
        }

        match self.seen.get(&worker_id) {
            Some(accepted) if !accepted.same_content(config) => {
                tracing::warn!(hostname = %hostname, worker_id = %worker_id, "hostname resolves to a differing volume config");
                return self.fail(hostname, WorkerErrorKind::DifferentVolumeConfigs).await;
            }
            Some(_) => {}
            None => {
                self.seen.insert(worker_id.clone(), config.clone());
            }
        }

        if self.is_in_flight(&worker_id).await? {
            return Ok(InitOutcome::InFlight(worker_id));
        }

        if force_delete.is_some() {
            // Cancelable delete loses to a new initialization request.
            self.keys.worker_force_delete().delete(&worker_id).await?;
        }
        self.keys.worker_force_update().delete(&worker_id).await?;
        self.keys
            .set_ready_for_deployment(&worker_id, Utc::now())
            .await?;
        tracing::info!(hostname = %hostname, worker_id = %worker_id, "worker ready for deployment");
        Ok(InitOutcome::Ready(worker_id))
    }

    async fn resolution_failed(
        &self,
        hostname: &Hostname,
        config: &VolumeConfig,
    ) -> Result<InitOutcome, FlowError> {
        tracing::warn!(
            hostname = %hostname,
            error = config.error.as_deref().unwrap_or("volume config has no worker id"),
            "failed to resolve volume config"
        );
        self.fail(hostname, WorkerErrorKind::FailedToGetVolumeConfig)
            .await
    }

    /// Put a hostname into error. Budgeted kinds stay pending until the
    /// hostname's attempt counter reaches the maximum.
    async fn fail(
        &self,
        hostname: &Hostname,
        kind: WorkerErrorKind,
    ) -> Result<InitOutcome, FlowError> {
        if kind.has_retry_budget() {
            let attempt = self.keys.hostname_error_attempt().incr(hostname).await?;
            if attempt < self.max_error_attempts {
                tracing::debug!(
                    hostname = %hostname,
                    kind = %kind,
                    attempt,
                    max = self.max_error_attempts,
                    "retry budget left"
                );
                return Ok(InitOutcome::Retrying { attempt });
            }
        }
        self.keys.set_hostname_error(hostname, kind).await?;
        Ok(InitOutcome::Failed(kind))
    }

    async fn is_in_flight(&self, worker_id: &WorkerId) -> Result<bool, StoreError> {
        Ok(self.keys.worker_ready_for_deployment().exists(worker_id).await?
            || self
                .keys
                .worker_waiting_for_deployment()
                .exists(worker_id)
                .await?)
    }
}
