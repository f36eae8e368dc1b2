// ABOUTME: Deployment specification built from layered values.
// ABOUTME: Global defaults, then volume config data, then per-tenant overrides.

use crate::types::{Namespace, WorkerId};
use crate::volume_config::VolumeConfig;
use serde_json::{Map, Value, json};

/// Everything the backend needs to install one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    pub worker_id: WorkerId,
    pub namespace: Namespace,
    pub deployment_type: String,
    pub values: Value,
}

impl DeploymentSpec {
    pub fn build(
        worker_id: &WorkerId,
        deployment_type: &str,
        defaults: &Value,
        volume_config: &VolumeConfig,
    ) -> Self {
        let mut values = Value::Object(Map::new());
        merge_values(&mut values, defaults);
        merge_values(&mut values, &volume_values(volume_config));
        merge_values(&mut values, &volume_config.extra_values);
        Self {
            worker_id: worker_id.clone(),
            namespace: Namespace::for_worker(worker_id),
            deployment_type: deployment_type.to_string(),
            values,
        }
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base
/// value. A null overlay leaves the base untouched.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Deployment values derived from a tenant's volume config.
pub fn volume_values(config: &VolumeConfig) -> Value {
    let tls: Vec<Value> = config
        .certificates
        .iter()
        .map(|(hostname, cert)| {
            json!({
                "hostname": hostname,
                "certificate": cert.certificate,
                "privateKey": cert.private_key,
            })
        })
        .collect();

    let challenges: Vec<Value> = config
        .challenges
        .iter()
        .flat_map(|(hostname, challenges)| {
            challenges.iter().map(move |c| {
                json!({
                    "hostname": hostname,
                    "token": c.token,
                    "payload": c.payload,
                })
            })
        })
        .collect();

    let mut values = json!({
        "hostnames": config.hostnames,
        "tls": tls,
        "challenges": challenges,
        "features": config.features,
    });
    if let Some(primary) = config.primary_hostname() {
        values["primaryHostname"] = json!(primary);
    }
    if let Some(zone) = &config.zone {
        values["zone"] = json!(zone);
    }
    if let Some(gateway) = &config.gateway {
        values["gateway"] = json!(gateway);
    }
    values
}
