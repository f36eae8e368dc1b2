// ABOUTME: State store pool configuration.
// ABOUTME: Each pool is either in-process memory or a shared directory.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub ingress: PoolConfig,

    #[serde(default)]
    pub internal: PoolConfig,

    #[serde(default)]
    pub metrics: PoolConfig,
}

impl StoreConfig {
    fn pools(&self) -> [(&'static str, &PoolConfig); 3] {
        [
            ("ingress", &self.ingress),
            ("internal", &self.internal),
            ("metrics", &self.metrics),
        ]
    }

    /// Reject pools that other processes cannot see.
    ///
    /// A loop running on its own coordinates with the ingress, the other
    /// loops and the workloads only through the store.
    pub fn require_shared(&self) -> Result<()> {
        let local: Vec<&str> = self
            .pools()
            .into_iter()
            .filter(|(_, pool)| pool.backend == PoolBackend::Memory)
            .map(|(name, _)| name)
            .collect();
        if local.is_empty() {
            return Ok(());
        }
        Err(Error::InvalidConfig(format!(
            "store pools [{}] use the memory backend, which only the `all` command can share",
            local.join(", ")
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawPoolConfig")]
pub struct PoolConfig {
    pub backend: PoolBackend,
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backend: PoolBackend::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// Where a pool keeps its keys.
///
/// `memory` is only shared by loops running in the same process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PoolBackend {
    #[default]
    Memory,
    Fs {
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPoolConfig {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
}

impl TryFrom<RawPoolConfig> for PoolConfig {
    type Error = String;

    fn try_from(raw: RawPoolConfig) -> std::result::Result<Self, Self::Error> {
        let backend = match (raw.backend.as_deref(), raw.path) {
            (None | Some("memory"), None) => PoolBackend::Memory,
            (None | Some("memory"), Some(_)) => {
                return Err("path is only valid for the fs backend".to_string());
            }
            (Some("fs"), Some(path)) => PoolBackend::Fs { path },
            (Some("fs"), None) => return Err("fs backend requires a path".to_string()),
            (Some(other), _) => return Err(format!("unknown store backend: {other}")),
        };
        if raw.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        Ok(Self {
            backend,
            max_connections: raw.max_connections,
        })
    }
}

fn default_max_connections() -> usize {
    8
}
