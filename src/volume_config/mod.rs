// ABOUTME: Normalized view of a tenant's remote volume configuration.
// ABOUTME: Parses the API payload into typed fields; failures become error snapshots.

mod api;
mod resolver;

pub use api::{ApiError, ConfigApi, HttpConfigApi};
pub use resolver::{CacheEntry, VolumeConfigResolver};

use crate::types::{Hostname, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a volume config is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeQuery {
    Hostname(Hostname),
    WorkerId(WorkerId),
}

impl std::fmt::Display for VolumeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeQuery::Hostname(h) => write!(f, "hostname {h}"),
            VolumeQuery::WorkerId(w) => write!(f, "worker {w}"),
        }
    }
}

/// Storage backend the gateway fronts, one case per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Gateway {
    S3 {
        url: String,
        access_key: String,
        secret_key: String,
    },
    Azure {
        account_name: String,
        account_key: String,
    },
    Google {
        project_id: String,
        credentials: String,
    },
}

impl Gateway {
    /// Parse an untyped gateway description.
    ///
    /// Anything that is not exactly one of the known providers with all of
    /// its fields yields `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate: String,
    pub private_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub token: String,
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub browser: bool,
    #[serde(default)]
    pub debug: bool,
}

/// Snapshot of one worker's configuration, or the reason it could not be fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeConfig {
    pub worker_id: Option<WorkerId>,
    pub zone: Option<String>,
    /// Primary hostname first.
    pub hostnames: Vec<Hostname>,
    pub certificates: BTreeMap<Hostname, Certificate>,
    pub challenges: BTreeMap<Hostname, Vec<Challenge>>,
    pub gateway: Option<Gateway>,
    pub features: Features,
    pub disable_force_update: bool,
    pub disable_force_delete: bool,
    /// Per-tenant deployment value overrides, highest precedence.
    pub extra_values: serde_json::Value,
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    /// API payload this snapshot was parsed from.
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    hostnames: Vec<RawHostname>,
    #[serde(default)]
    gateway: Option<serde_json::Value>,
    #[serde(default)]
    features: Features,
    #[serde(default)]
    disable_force_update: bool,
    #[serde(default)]
    disable_force_delete: bool,
    #[serde(default)]
    extra_values: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawHostname {
    hostname: String,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    challenges: Vec<Challenge>,
}

impl VolumeConfig {
    /// Parse an API payload. Returns a description of the problem on shape errors.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, String> {
        let raw: RawVolume = serde_json::from_value(payload.clone())
            .map_err(|e| format!("invalid volume config payload: {e}"))?;

        let worker_id = raw
            .id
            .as_deref()
            .map(WorkerId::parse)
            .transpose()
            .map_err(|e| e.to_string())?;

        let mut config = VolumeConfig {
            worker_id,
            zone: raw.zone.filter(|z| !z.trim().is_empty()),
            gateway: raw.gateway.as_ref().and_then(Gateway::from_value),
            features: raw.features,
            disable_force_update: raw.disable_force_update,
            disable_force_delete: raw.disable_force_delete,
            extra_values: raw.extra_values,
            payload: Some(payload.clone()),
            ..Default::default()
        };

        for entry in raw.hostnames {
            let hostname = Hostname::parse(&entry.hostname).map_err(|e| e.to_string())?;
            if let (Some(certificate), Some(private_key)) = (entry.certificate, entry.private_key)
            {
                config.certificates.insert(
                    hostname.clone(),
                    Certificate {
                        certificate,
                        private_key,
                    },
                );
            }
            if !entry.challenges.is_empty() {
                config.challenges.insert(hostname.clone(), entry.challenges);
            }
            if !config.hostnames.contains(&hostname) {
                config.hostnames.push(hostname);
            }
        }

        Ok(config)
    }

    /// An error snapshot carrying only the failure reason.
    pub fn failed(worker_id: Option<WorkerId>, error: impl Into<String>) -> Self {
        VolumeConfig {
            worker_id,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn primary_hostname(&self) -> Option<&Hostname> {
        self.hostnames.first()
    }

    /// Compare the tenant-visible content, ignoring when and from what it was
    /// fetched.
    pub fn same_content(&self, other: &VolumeConfig) -> bool {
        let strip = |c: &VolumeConfig| VolumeConfig {
            last_update: None,
            payload: None,
            ..c.clone()
        };
        strip(self) == strip(other)
    }
}
