// ABOUTME: Directory-backed key-value store shared by daemon processes on one host.
// ABOUTME: One file per key; atomic writes via rename and create-new lock files for incr.

use super::{KvStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const TEMP_PREFIX: &str = ".tmp-";
const LOCK_PREFIX: &str = ".lock-";

/// Locks older than this are assumed to belong to a crashed process.
const STALE_LOCK_SECS: i64 = 30;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_ATTEMPTS: u32 = 500;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Contents of an increment lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrLockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
}

impl IncrLockInfo {
    fn new() -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        (Utc::now() - self.started_at).num_seconds() >= STALE_LOCK_SECS
    }
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(urlencoding::encode(key).as_ref())
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{LOCK_PREFIX}{}", urlencoding::encode(key)))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))
    }

    async fn write_atomic(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_root().await?;
        let temp = self.root.join(format!(
            "{TEMP_PREFIX}{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, value)
            .await
            .map_err(|e| io_error(&temp, e))?;
        let target = self.key_path(key);
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(&target, e));
        }
        Ok(())
    }

    /// Acquire the per-key increment lock.
    ///
    /// Uses create-new so exactly one process wins; stale locks are broken.
    async fn lock(&self, key: &str) -> Result<IncrLock, StoreError> {
        self.ensure_root().await?;
        let path = self.lock_path(key);
        let info = serde_json::to_string(&IncrLockInfo::new()).unwrap_or_default();

        for _ in 0..LOCK_ATTEMPTS {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => {
                    tokio::fs::write(&path, &info)
                        .await
                        .map_err(|e| io_error(&path, e))?;
                    return Ok(IncrLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.lock_is_stale(&path).await {
                        if self.break_stale_lock(&path).await {
                            tracing::warn!(lock = %path.display(), "broke stale store lock");
                        }
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Err(StoreError::LockTimeout(key.to_string()))
    }

    /// Move a stale lock aside, then delete it.
    ///
    /// Rename is atomic, so of several processes breaking one lock only one
    /// takes the file. The moved file is checked again: if a live holder
    /// replaced the stale lock in between, it is linked back into place.
    async fn break_stale_lock(&self, path: &Path) -> bool {
        let mut aside = path.as_os_str().to_owned();
        aside.push(format!(
            ".broken-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let aside = PathBuf::from(aside);

        if tokio::fs::rename(path, &aside).await.is_err() {
            return false;
        }
        let stale = self.lock_is_stale(&aside).await;
        if !stale && let Err(e) = tokio::fs::hard_link(&aside, path).await {
            tracing::warn!(lock = %path.display(), "failed to restore live store lock: {}", e);
        }
        let _ = tokio::fs::remove_file(&aside).await;
        stale
    }

    async fn lock_is_stale(&self, path: &Path) -> bool {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<IncrLockInfo>(&content) {
                Ok(info) => info.is_stale(),
                // Written by create-new but not yet filled in; only stale if old.
                Err(_) => modified_before(path, STALE_LOCK_SECS).await,
            },
            Err(_) => false,
        }
    }
}

async fn modified_before(path: &Path, secs: i64) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age.as_secs() as i64 >= secs)
}

/// A held increment lock, removed on drop.
struct IncrLock {
    path: PathBuf,
}

impl Drop for IncrLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), "failed to release store lock: {}", e);
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl KvStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_atomic(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.key_path(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            if let Ok(key) = urlencoding::decode(&name)
                && key.starts_with(prefix)
            {
                keys.push(key.into_owned());
            }
        }
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let _lock = self.lock(key).await?;
        let current = match self.get(key).await? {
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value,
                })?,
            None => 0,
        };
        let next = current + 1;
        self.write_atomic(key, &next.to_string()).await?;
        Ok(next)
    }
}
