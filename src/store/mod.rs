// ABOUTME: Shared key-value state store used by every reconciliation loop.
// ABOUTME: Three logical pools (ingress, internal, metrics) behind one async trait.

mod fs;
mod keys;
mod memory;
mod pool;

pub use fs::{FsStore, IncrLockInfo};
pub use keys::{ForceDelete, KeyFamily, Keyspace, WaitingMarker};
pub use memory::MemoryStore;
pub use pool::{Connection, Pool};

use crate::config::{PoolBackend, PoolConfig, StoreConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Primitive operations every store backend provides.
///
/// Operations are key-scoped; there are no multi-key transactions.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically increment an integer key, treating a missing key as 0.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
}

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("value of {key} is not an integer: {value:?}")]
    NotAnInteger { key: String, value: String },

    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("{0} pool is closed")]
    PoolClosed(&'static str),
}

/// The three pools the operator reads and writes.
#[derive(Clone)]
pub struct StateStore {
    /// Shared with the inbound-request component (hostname keys).
    pub ingress: Pool,
    /// Operator-only bookkeeping (worker keys).
    pub internal: Pool,
    /// Shared with deployed workloads (activity timestamps).
    pub metrics: Pool,
}

impl StateStore {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            ingress: build_pool("ingress", &config.ingress),
            internal: build_pool("internal", &config.internal),
            metrics: build_pool("metrics", &config.metrics),
        }
    }

    /// Three independent in-memory pools.
    pub fn in_memory() -> Self {
        Self {
            ingress: Pool::new("ingress", Arc::new(MemoryStore::default()), 16),
            internal: Pool::new("internal", Arc::new(MemoryStore::default()), 16),
            metrics: Pool::new("metrics", Arc::new(MemoryStore::default()), 16),
        }
    }
}

fn build_pool(name: &'static str, config: &PoolConfig) -> Pool {
    let store: Arc<dyn KvStore> = match &config.backend {
        PoolBackend::Memory => Arc::new(MemoryStore::default()),
        PoolBackend::Fs { path } => Arc::new(FsStore::new(path.clone())),
    };
    Pool::new(name, store, config.max_connections)
}
