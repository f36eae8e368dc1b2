// ABOUTME: Per-loop scheduling intervals, retry budgets and grace periods.
// ABOUTME: Every field has a default so sections can be omitted.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InitializerConfig {
    #[serde(default = "default_fast_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Failed volume config fetches tolerated per hostname.
    #[serde(default = "default_max_error_attempts")]
    pub max_error_attempts: i64,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            interval: default_fast_interval(),
            max_error_attempts: default_max_error_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    #[serde(default = "default_fast_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Failed deploy calls tolerated per worker.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Global default deployment values, lowest precedence.
    #[serde(default)]
    pub values: serde_json::Value,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            interval: default_fast_interval(),
            max_attempts: default_max_attempts(),
            values: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaiterConfig {
    #[serde(default = "default_fast_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// How long a deployment may take to become ready.
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    /// How long to wait before retrying a deployment whose deploy call failed.
    #[serde(default = "default_retry_wait", with = "humantime_serde")]
    pub retry_wait: Duration,

    /// Probe the resolved address over HTTP before marking available.
    #[serde(default = "default_true")]
    pub verify_access: bool,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            interval: default_fast_interval(),
            max_wait: default_max_wait(),
            retry_wait: default_retry_wait(),
            verify_access: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleterConfig {
    #[serde(default = "default_slow_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_true")]
    pub delete_namespace: bool,

    #[serde(default = "default_true")]
    pub delete_release: bool,
}

impl Default for DeleterConfig {
    fn default() -> Self {
        Self {
            interval: default_slow_interval(),
            delete_namespace: true,
            delete_release: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default = "default_updater_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// A release still pending after this long is re-deployed.
    #[serde(default = "default_pending_grace", with = "humantime_serde")]
    pub pending_grace: Duration,

    /// Only releases at or below this revision count as stuck first deploys.
    #[serde(default = "default_pending_max_revision")]
    pub pending_max_revision: u32,

    /// A deployed release without tenant activity for this long is deleted.
    #[serde(default = "default_idle_grace", with = "humantime_serde")]
    pub idle_grace: Duration,

    /// A deployed release not updated for this long is re-deployed.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: default_updater_interval(),
            pending_grace: default_pending_grace(),
            pending_max_revision: default_pending_max_revision(),
            idle_grace: default_idle_grace(),
            max_age: default_max_age(),
        }
    }
}

fn default_fast_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_slow_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_updater_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_error_attempts() -> i64 {
    5
}

fn default_max_attempts() -> i64 {
    3
}

fn default_max_wait() -> Duration {
    Duration::from_secs(600)
}

fn default_retry_wait() -> Duration {
    Duration::from_secs(120)
}

fn default_pending_grace() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_pending_max_revision() -> u32 {
    2
}

fn default_idle_grace() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_true() -> bool {
    true
}
