// ABOUTME: Configuration types and parsing for operator.yml.
// ABOUTME: One explicit value built at startup and shared with every loop.

mod backend;
mod env_value;
mod loops;
mod store;

pub use backend::BackendConfig;
pub use env_value::EnvValue;
pub use loops::{DeleterConfig, DeployerConfig, InitializerConfig, UpdaterConfig, WaiterConfig};
pub use store::{PoolBackend, PoolConfig, StoreConfig};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "operator.yml";
pub const CONFIG_FILENAME_ALT: &str = "operator.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".operator/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub cluster: ClusterConfig,

    pub api: ApiConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub initializer: InitializerConfig,

    #[serde(default)]
    pub deployer: DeployerConfig,

    #[serde(default)]
    pub waiter: WaiterConfig,

    #[serde(default)]
    pub deleter: DeleterConfig,

    #[serde(default)]
    pub updater: UpdaterConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Zone this cluster serves; volumes for other zones are rejected.
    pub zone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the remote volume configuration API.
    pub url: String,

    #[serde(default)]
    pub token: Option<EnvValue>,

    #[serde(default = "default_api_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

impl OperatorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Reject values that would make a loop spin or never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.zone.trim().is_empty() {
            return Err(Error::InvalidConfig("cluster.zone cannot be empty".into()));
        }
        if self.api.url.trim().is_empty() {
            return Err(Error::InvalidConfig("api.url cannot be empty".into()));
        }
        let intervals = [
            ("initializer.interval", self.initializer.interval),
            ("deployer.interval", self.deployer.interval),
            ("waiter.interval", self.waiter.interval),
            ("deleter.interval", self.deleter.interval),
            ("updater.interval", self.updater.interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::InvalidConfig(format!("{name} must be greater than 0")));
        }
        if self.initializer.max_error_attempts < 1 {
            return Err(Error::InvalidConfig(
                "initializer.max_error_attempts must be at least 1".into(),
            ));
        }
        if self.deployer.max_attempts < 1 {
            return Err(Error::InvalidConfig(
                "deployer.max_attempts must be at least 1".into(),
            ));
        }
        if !self.deployer.values.is_null() && !self.deployer.values.is_object() {
            return Err(Error::InvalidConfig(
                "deployer.values must be a mapping".into(),
            ));
        }
        Ok(())
    }

    /// Minimal configuration for a zone, all other sections at defaults.
    pub fn for_zone(zone: &str, api_url: &str) -> Self {
        OperatorConfig {
            cluster: ClusterConfig {
                zone: zone.to_string(),
            },
            api: ApiConfig {
                url: api_url.to_string(),
                token: None,
                timeout: default_api_timeout(),
            },
            store: StoreConfig::default(),
            initializer: InitializerConfig::default(),
            deployer: DeployerConfig::default(),
            waiter: WaiterConfig::default(),
            deleter: DeleterConfig::default(),
            updater: UpdaterConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}
