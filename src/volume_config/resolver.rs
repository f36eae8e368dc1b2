// ABOUTME: Resolves volume configs through the remote API with a per-worker cache.
// ABOUTME: Successful and failed fetches are both cached; resolution never fails.

use super::{ConfigApi, VolumeConfig, VolumeQuery};
use crate::store::Keyspace;
use crate::types::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cached fetch result stored under `worker:volume:config:<worker_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheEntry {
    fn materialize(&self, worker_id: &WorkerId) -> VolumeConfig {
        let mut config = match (&self.payload, &self.error) {
            (_, Some(error)) => VolumeConfig::failed(Some(worker_id.clone()), error.clone()),
            (Some(payload), None) => VolumeConfig::from_payload(payload)
                .unwrap_or_else(|e| VolumeConfig::failed(Some(worker_id.clone()), e)),
            (None, None) => {
                VolumeConfig::failed(Some(worker_id.clone()), "empty cache entry")
            }
        };
        config.last_update = Some(self.last_update);
        config
    }
}

#[derive(Clone)]
pub struct VolumeConfigResolver {
    api: Arc<dyn ConfigApi>,
    keys: Keyspace,
}

impl VolumeConfigResolver {
    pub fn new(api: Arc<dyn ConfigApi>, keys: Keyspace) -> Self {
        Self { api, keys }
    }

    pub async fn by_hostname(&self, hostname: &crate::types::Hostname) -> VolumeConfig {
        self.resolve(VolumeQuery::Hostname(hostname.clone()), false)
            .await
    }

    pub async fn by_worker_id(&self, worker_id: &WorkerId, force_update: bool) -> VolumeConfig {
        self.resolve(VolumeQuery::WorkerId(worker_id.clone()), force_update)
            .await
    }

    /// Resolve a volume config, using the cache when allowed.
    ///
    /// Only worker id lookups can hit the cache. Every API result that can be
    /// attributed to a worker is written back, including failures.
    pub async fn resolve(&self, query: VolumeQuery, force_update: bool) -> VolumeConfig {
        if let (VolumeQuery::WorkerId(worker_id), false) = (&query, force_update)
            && let Some(config) = self.cached(worker_id).await
        {
            return config;
        }

        let now = Utc::now();
        let fetched = match self.api.fetch(&query).await {
            Ok(payload) => validate(&query, &payload).map(|config| (config, payload)),
            Err(e) => Err(e.to_string()),
        };

        let (config, entry) = match fetched {
            Ok((config, payload)) => {
                let entry = CacheEntry {
                    last_update: now,
                    payload: Some(payload),
                    error: None,
                };
                (config, entry)
            }
            Err(error) => {
                tracing::debug!(query = %query, error = %error, "volume config fetch failed");
                let worker_id = match &query {
                    VolumeQuery::WorkerId(id) => Some(id.clone()),
                    VolumeQuery::Hostname(_) => None,
                };
                let entry = CacheEntry {
                    last_update: now,
                    payload: None,
                    error: Some(error.clone()),
                };
                (VolumeConfig::failed(worker_id, error), entry)
            }
        };

        if let Some(worker_id) = &config.worker_id {
            self.store(worker_id, &entry).await;
        }

        VolumeConfig {
            last_update: Some(now),
            ..config
        }
    }

    /// Write an already-resolved config back to its worker's cache entry.
    ///
    /// Used when a later lookup overwrote the entry with a config that was
    /// then rejected.
    pub async fn remember(&self, config: &VolumeConfig) {
        let (Some(worker_id), Some(payload)) = (&config.worker_id, &config.payload) else {
            return;
        };
        let entry = CacheEntry {
            last_update: config.last_update.unwrap_or_else(Utc::now),
            payload: Some(payload.clone()),
            error: None,
        };
        self.store(worker_id, &entry).await;
    }

    /// Cached config for a worker, without touching the API.
    pub async fn cached(&self, worker_id: &WorkerId) -> Option<VolumeConfig> {
        let raw = match self.keys.worker_volume_config().get(worker_id).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, "failed to read volume config cache: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry.materialize(worker_id)),
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, "discarding unreadable volume config cache: {}", e);
                None
            }
        }
    }

    async fn store(&self, worker_id: &WorkerId, entry: &CacheEntry) {
        let result = match serde_json::to_string(entry) {
            Ok(json) => self
                .keys
                .worker_volume_config()
                .set(worker_id, &json)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            tracing::warn!(worker_id = %worker_id, "failed to cache volume config: {}", e);
        }
    }
}

/// Parse a payload and check its worker id against the query.
fn validate(query: &VolumeQuery, payload: &serde_json::Value) -> Result<VolumeConfig, String> {
    let config = VolumeConfig::from_payload(payload)?;
    match (query, &config.worker_id) {
        (_, None) => Err("volume config has no worker id".to_string()),
        (VolumeQuery::WorkerId(requested), Some(returned)) if requested != returned => Err(
            format!("volume config worker id mismatch: requested {requested}, got {returned}"),
        ),
        _ => Ok(config),
    }
}
