// ABOUTME: Bounded connection pool over a store backend.
// ABOUTME: Connections are scoped guards that release their slot on drop.

use super::{KvStore, StoreError};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// A named store backend with a cap on concurrent connections.
#[derive(Clone)]
pub struct Pool {
    name: &'static str,
    store: Arc<dyn KvStore>,
    slots: Arc<Semaphore>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("available", &self.slots.available_permits())
            .finish()
    }
}

impl Pool {
    pub fn new(name: &'static str, store: Arc<dyn KvStore>, max_connections: usize) -> Self {
        Self {
            name,
            store,
            slots: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Connection slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Acquire a connection, waiting for a free slot.
    pub async fn connection(&self) -> Result<Connection<'_>, StoreError> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| StoreError::PoolClosed(self.name))?;
        Ok(Connection {
            store: self.store.as_ref(),
            _permit: permit,
        })
    }
}

/// A held connection. The slot returns to the pool when this is dropped,
/// including when an operation through it fails.
pub struct Connection<'a> {
    store: &'a dyn KvStore,
    _permit: SemaphorePermit<'a>,
}

impl Connection<'_> {
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.set(key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.store.exists(key).await
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.store.keys_with_prefix(prefix).await
    }

    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.store.incr(key).await
    }
}
