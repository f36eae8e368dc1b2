// ABOUTME: Deployment backend configuration (helm, kubectl, chart, probe).
// ABOUTME: Defaults target an in-cluster deployment of the gateway chart.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_helm")]
    pub helm: String,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Chart reference passed to `helm upgrade --install`.
    #[serde(default = "default_chart")]
    pub chart: String,

    #[serde(default)]
    pub chart_version: Option<String>,

    /// Deployment type; also the release and service name.
    #[serde(default = "default_deployment_type")]
    pub deployment_type: String,

    /// Port the workload's service listens on.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    /// Substring the probe response body must contain; empty accepts any body.
    #[serde(default)]
    pub probe_expect: String,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            helm: default_helm(),
            kubectl: default_kubectl(),
            chart: default_chart(),
            chart_version: None,
            deployment_type: default_deployment_type(),
            service_port: default_service_port(),
            probe_path: default_probe_path(),
            probe_expect: String::new(),
            command_timeout: default_command_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

fn default_helm() -> String {
    "helm".to_string()
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_chart() -> String {
    "storage-gateway".to_string()
}

fn default_deployment_type() -> String {
    "gateway".to_string()
}

fn default_service_port() -> u16 {
    8080
}

fn default_probe_path() -> String {
    "/health/live".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}
