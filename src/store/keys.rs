// ABOUTME: Typed view of the operator keyspace on top of the three store pools.
// ABOUTME: Key families per phase flag plus the composite multi-key transitions.

use super::{Pool, StateStore, StoreError};
use crate::types::{Hostname, HostnameMarker, Id, Namespace, WorkerErrorKind, WorkerId, WorkerMarker};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::marker::PhantomData;

const RETRY_AFTER_ERROR: &str = "error";
const ALLOW_CANCEL: &str = "allow_cancel";
const LAST_ACTION_PREFIX: &str = "deployment:last_action:";

/// All keys sharing a prefix, suffixed by an id of one kind.
pub struct KeyFamily<'a, M> {
    pool: &'a Pool,
    prefix: &'static str,
    _marker: PhantomData<M>,
}

impl<'a, M> KeyFamily<'a, M> {
    fn new(pool: &'a Pool, prefix: &'static str) -> Self {
        Self {
            pool,
            prefix,
            _marker: PhantomData,
        }
    }

    pub fn key(&self, id: &Id<M>) -> String {
        format!("{}{}", self.prefix, id)
    }

    pub async fn get(&self, id: &Id<M>) -> Result<Option<String>, StoreError> {
        self.pool.connection().await?.get(&self.key(id)).await
    }

    pub async fn set(&self, id: &Id<M>, value: &str) -> Result<(), StoreError> {
        self.pool.connection().await?.set(&self.key(id), value).await
    }

    pub async fn delete(&self, id: &Id<M>) -> Result<bool, StoreError> {
        self.pool.connection().await?.delete(&self.key(id)).await
    }

    pub async fn exists(&self, id: &Id<M>) -> Result<bool, StoreError> {
        self.pool.connection().await?.exists(&self.key(id)).await
    }

    pub async fn incr(&self, id: &Id<M>) -> Result<i64, StoreError> {
        self.pool.connection().await?.incr(&self.key(id)).await
    }

    /// Read an integer value, treating a missing key as 0.
    pub async fn get_int(&self, id: &Id<M>) -> Result<i64, StoreError> {
        match self.get(id).await? {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| StoreError::NotAnInteger {
                    key: self.key(id),
                    value,
                }),
            None => Ok(0),
        }
    }

    /// Every id that currently has a key in this family, sorted.
    ///
    /// This is a full prefix scan of the pool on every call.
    pub async fn ids(&self) -> Result<Vec<Id<M>>, StoreError> {
        let keys = self
            .pool
            .connection()
            .await?
            .keys_with_prefix(self.prefix)
            .await?;
        let mut ids: Vec<Id<M>> = keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix).map(|id| Id::new(id)))
            .filter(|id| !id.as_str().is_empty())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Value of the waiting-for-deployment marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingMarker {
    /// The deployer's backend call succeeded.
    Deploying,
    /// The backend call failed; a timeout hands the worker back for retry.
    RetryAfterError,
}

/// Value of the force-delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceDelete {
    /// Renewed deployment activity may pre-empt the deletion.
    pub allow_cancel: bool,
}

impl ForceDelete {
    /// A hard delete blocks every step towards deployment.
    pub fn suppresses_deployment(&self) -> bool {
        !self.allow_cancel
    }
}

/// Typed access to every operator key.
#[derive(Clone)]
pub struct Keyspace {
    store: StateStore,
}

impl Keyspace {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // Hostname keys, shared with the inbound-request component.

    pub fn hostname_initialize(&self) -> KeyFamily<'_, HostnameMarker> {
        KeyFamily::new(&self.store.ingress, "hostname:initialize:")
    }

    pub fn hostname_available(&self) -> KeyFamily<'_, HostnameMarker> {
        KeyFamily::new(&self.store.ingress, "hostname:available:")
    }

    pub fn hostname_ingress_hostname(&self) -> KeyFamily<'_, HostnameMarker> {
        KeyFamily::new(&self.store.ingress, "hostname:ingress:hostname:")
    }

    pub fn hostname_error(&self) -> KeyFamily<'_, HostnameMarker> {
        KeyFamily::new(&self.store.ingress, "hostname:error:")
    }

    pub fn hostname_error_attempt(&self) -> KeyFamily<'_, HostnameMarker> {
        KeyFamily::new(&self.store.ingress, "hostname:error_attempt:")
    }

    // Worker keys, internal to the operator.

    pub fn worker_volume_config(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(&self.store.internal, "worker:volume:config:")
    }

    pub fn worker_ready_for_deployment(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(&self.store.internal, "worker:opstatus:ready_for_deployment:")
    }

    pub fn worker_waiting_for_deployment(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(&self.store.internal, "worker:opstatus:waiting_for_deployment:")
    }

    pub fn worker_force_update(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(&self.store.internal, "worker:force_update:")
    }

    pub fn worker_force_delete(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(&self.store.internal, "worker:force_delete:")
    }

    pub fn worker_deployment_error_attempt(&self) -> KeyFamily<'_, WorkerMarker> {
        KeyFamily::new(
            &self.store.internal,
            "worker:opstatus:deployment_error_attempt:",
        )
    }

    // Typed marker values.

    pub async fn ready_for_deployment_since(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(value) = self.worker_ready_for_deployment().get(worker_id).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(value.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(_) => {
                // Unreadable start time counts as long ago so the wait times out.
                tracing::warn!(worker_id = %worker_id, value = %value, "unparseable ready_for_deployment timestamp");
                Ok(Some(DateTime::<Utc>::UNIX_EPOCH))
            }
        }
    }

    pub async fn set_ready_for_deployment(
        &self,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.worker_ready_for_deployment()
            .set(worker_id, &at.to_rfc3339())
            .await
    }

    pub async fn waiting_for_deployment(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Option<WaitingMarker>, StoreError> {
        Ok(self
            .worker_waiting_for_deployment()
            .get(worker_id)
            .await?
            .map(|value| {
                if value == RETRY_AFTER_ERROR {
                    WaitingMarker::RetryAfterError
                } else {
                    WaitingMarker::Deploying
                }
            }))
    }

    pub async fn set_waiting_for_deployment(
        &self,
        worker_id: &WorkerId,
        marker: WaitingMarker,
    ) -> Result<(), StoreError> {
        let value = match marker {
            WaitingMarker::Deploying => "",
            WaitingMarker::RetryAfterError => RETRY_AFTER_ERROR,
        };
        self.worker_waiting_for_deployment()
            .set(worker_id, value)
            .await
    }

    pub async fn force_delete(
        &self,
        worker_id: &WorkerId,
    ) -> Result<Option<ForceDelete>, StoreError> {
        Ok(self
            .worker_force_delete()
            .get(worker_id)
            .await?
            .map(|value| ForceDelete {
                allow_cancel: value == ALLOW_CANCEL,
            }))
    }

    /// Whether a hard force-delete is pending for the worker.
    pub async fn deployment_suppressed(&self, worker_id: &WorkerId) -> Result<bool, StoreError> {
        Ok(self
            .force_delete(worker_id)
            .await?
            .is_some_and(|marker| marker.suppresses_deployment()))
    }

    pub async fn set_force_delete(
        &self,
        worker_id: &WorkerId,
        marker: ForceDelete,
    ) -> Result<(), StoreError> {
        let value = if marker.allow_cancel { ALLOW_CANCEL } else { "" };
        self.worker_force_delete().set(worker_id, value).await
    }

    pub async fn set_force_update(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        self.worker_force_update().set(worker_id, "").await
    }

    /// Last activity a deployed workload reported, if any.
    pub async fn last_action(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = format!("{LAST_ACTION_PREFIX}{namespace}");
        let value = self.store.metrics.connection().await?.get(&key).await?;
        Ok(value
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|ts| ts.with_timezone(&Utc)))
    }

    pub async fn set_last_action(
        &self,
        namespace: &Namespace,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = format!("{LAST_ACTION_PREFIX}{namespace}");
        self.store
            .metrics
            .connection()
            .await?
            .set(&key, &at.to_rfc3339())
            .await
    }

    /// Hostnames awaiting initialization, normalized and sorted.
    ///
    /// The ingress writes these keys in whatever form it received, so a key
    /// in another case or with a trailing dot is moved to its normalized
    /// name. Keys that are no hostname at all get `INVALID_HOSTNAME`.
    pub async fn initializing_hostnames(&self) -> Result<Vec<Hostname>, StoreError> {
        let mut hostnames = BTreeSet::new();
        for raw in self.hostname_initialize().ids().await? {
            match Hostname::parse(raw.as_str()) {
                Ok(hostname) if hostname == raw => {
                    hostnames.insert(hostname);
                }
                Ok(hostname) => {
                    let value = self.hostname_initialize().get(&raw).await?.unwrap_or_default();
                    self.hostname_initialize().set(&hostname, &value).await?;
                    self.hostname_initialize().delete(&raw).await?;
                    tracing::debug!(raw = %raw, hostname = %hostname, "normalized initialization request");
                    hostnames.insert(hostname);
                }
                Err(e) => {
                    tracing::warn!(hostname = %raw, "rejecting initialization request: {}", e);
                    self.set_hostname_error(&raw, WorkerErrorKind::InvalidHostname)
                        .await?;
                }
            }
        }
        Ok(hostnames.into_iter().collect())
    }

    /// Whether any of the hostnames is waiting for initialization.
    pub async fn any_hostname_initializing(
        &self,
        hostnames: &[Hostname],
    ) -> Result<bool, StoreError> {
        for hostname in hostnames {
            if self.hostname_initialize().exists(hostname).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Composite transitions. None of these are atomic; each is ordered so
    // that a crash part-way leaves keys a later iteration still acts on.

    /// Put a single hostname into a terminal error state.
    pub async fn set_hostname_error(
        &self,
        hostname: &Hostname,
        kind: WorkerErrorKind,
    ) -> Result<(), StoreError> {
        self.hostname_error().set(hostname, kind.as_str()).await?;
        self.hostname_available().delete(hostname).await?;
        self.hostname_ingress_hostname().delete(hostname).await?;
        self.hostname_error_attempt().delete(hostname).await?;
        self.hostname_initialize().delete(hostname).await?;
        Ok(())
    }

    /// Put every hostname of a worker into error and drop its in-flight markers.
    pub async fn set_worker_error(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
        kind: WorkerErrorKind,
    ) -> Result<(), StoreError> {
        for hostname in hostnames {
            self.set_hostname_error(hostname, kind).await?;
        }
        self.worker_waiting_for_deployment().delete(worker_id).await?;
        self.worker_ready_for_deployment().delete(worker_id).await?;
        self.worker_deployment_error_attempt()
            .delete(worker_id)
            .await?;
        Ok(())
    }

    /// Publish a worker as reachable at `address` under all its hostnames.
    pub async fn set_worker_available(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
        address: &str,
    ) -> Result<(), StoreError> {
        for hostname in hostnames {
            self.hostname_ingress_hostname()
                .set(hostname, address)
                .await?;
            self.hostname_available().set(hostname, "").await?;
            self.hostname_error().delete(hostname).await?;
            self.hostname_error_attempt().delete(hostname).await?;
            self.hostname_initialize().delete(hostname).await?;
        }
        self.worker_deployment_error_attempt()
            .delete(worker_id)
            .await?;
        self.worker_waiting_for_deployment().delete(worker_id).await?;
        self.worker_ready_for_deployment().delete(worker_id).await?;
        Ok(())
    }

    /// Remove every key belonging to a worker and its hostnames.
    ///
    /// The force-delete marker goes last so an interrupted clear is retried.
    pub async fn del_worker_keys(
        &self,
        worker_id: &WorkerId,
        hostnames: &[Hostname],
    ) -> Result<(), StoreError> {
        for hostname in hostnames {
            self.hostname_initialize().delete(hostname).await?;
            self.hostname_available().delete(hostname).await?;
            self.hostname_ingress_hostname().delete(hostname).await?;
            self.hostname_error().delete(hostname).await?;
            self.hostname_error_attempt().delete(hostname).await?;
        }
        self.worker_ready_for_deployment().delete(worker_id).await?;
        self.worker_waiting_for_deployment().delete(worker_id).await?;
        self.worker_deployment_error_attempt()
            .delete(worker_id)
            .await?;
        self.worker_force_update().delete(worker_id).await?;
        self.worker_volume_config().delete(worker_id).await?;
        self.worker_force_delete().delete(worker_id).await?;
        Ok(())
    }
}
