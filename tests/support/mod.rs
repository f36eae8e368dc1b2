// ABOUTME: Test support utilities.
// ABOUTME: Scripted config API, recording fake backend and an in-memory harness for the loops.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Once};
use storage_operator::backend::{
    BackendError, DeleteOptions, DeploymentBackend, DeploymentSpec, Release, ReleaseStatus,
};
use storage_operator::config::OperatorConfig;
use storage_operator::diagnostics::Observations;
use storage_operator::loops::{LoopContext, LoopKind};
use storage_operator::store::{Keyspace, StateStore};
use storage_operator::types::{Hostname, Namespace, WorkerId};
use storage_operator::volume_config::{ApiError, ConfigApi, VolumeQuery};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("storage_operator=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn host(name: &str) -> Hostname {
    Hostname::parse(name).unwrap()
}

pub fn worker(id: &str) -> WorkerId {
    WorkerId::parse(id).unwrap()
}

/// API payload for a worker serving `hostnames` in `zone`.
pub fn volume_payload(id: &str, zone: &str, hostnames: &[&str]) -> Value {
    let hostnames: Vec<Value> = hostnames
        .iter()
        .map(|h| {
            json!({
                "hostname": h,
                "certificate": format!("CERT-{h}"),
                "private_key": format!("KEY-{h}"),
            })
        })
        .collect();
    json!({
        "id": id,
        "zone": zone,
        "hostnames": hostnames,
        "gateway": {"type": "s3", "url": "https://s3.local", "access_key": "ak", "secret_key": "sk"},
        "features": {"cache": true},
    })
}

/// Config API answering from a fixed table; unknown queries are not found.
#[derive(Default)]
pub struct ScriptedConfigApi {
    responses: Mutex<HashMap<String, Result<Value, String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedConfigApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn by_hostname(&self, hostname: &str, payload: Value) {
        self.responses
            .lock()
            .insert(format!("hostname={hostname}"), Ok(payload));
    }

    pub fn by_worker(&self, worker_id: &str, payload: Value) {
        self.responses
            .lock()
            .insert(format!("worker_id={worker_id}"), Ok(payload));
    }

    /// Answer both lookups for every hostname in the payload and its id.
    pub fn serve(&self, payload: Value) {
        if let Some(hostnames) = payload["hostnames"].as_array() {
            for entry in hostnames {
                if let Some(hostname) = entry["hostname"].as_str() {
                    self.by_hostname(hostname, payload.clone());
                }
            }
        }
        if let Some(id) = payload["id"].as_str() {
            self.by_worker(id, payload.clone());
        }
    }

    pub fn fail_hostname(&self, hostname: &str, message: &str) {
        self.responses
            .lock()
            .insert(format!("hostname={hostname}"), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConfigApi for ScriptedConfigApi {
    async fn fetch(&self, query: &VolumeQuery) -> Result<Value, ApiError> {
        let key = match query {
            VolumeQuery::Hostname(h) => format!("hostname={h}"),
            VolumeQuery::WorkerId(w) => format!("worker_id={w}"),
        };
        self.calls.lock().push(key.clone());
        match self.responses.lock().get(&key) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(message)) => Err(ApiError::Status {
                status: 503,
                body: message.clone(),
            }),
            None => Err(ApiError::NotFound(key)),
        }
    }
}

#[derive(Default)]
struct BackendState {
    calls: Vec<String>,
    deploy_failures: u32,
    ready: HashMap<String, bool>,
    access_ok: bool,
    delete_fails: bool,
    releases: Vec<Release>,
    deployed: Vec<DeploymentSpec>,
}

/// Deployment backend that records calls and answers from scripted state.
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                access_ok: true,
                ..BackendState::default()
            }),
        })
    }

    /// Make the next `n` deploy calls fail.
    pub fn fail_deploys(&self, n: u32) {
        self.state.lock().deploy_failures = n;
    }

    pub fn set_ready(&self, worker_id: &str, ready: bool) {
        self.state
            .lock()
            .ready
            .insert(format!("worker-{worker_id}"), ready);
    }

    pub fn set_access_ok(&self, ok: bool) {
        self.state.lock().access_ok = ok;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().delete_fails = fail;
    }

    pub fn add_release(
        &self,
        worker_id: &str,
        status: &str,
        updated: DateTime<Utc>,
        revision: u32,
    ) {
        self.state.lock().releases.push(Release {
            name: "gateway".into(),
            namespace: format!("worker-{worker_id}"),
            updated,
            status: ReleaseStatus::parse(status),
            revision,
        });
    }

    pub fn add_foreign_release(&self, namespace: &str) {
        self.state.lock().releases.push(Release {
            name: "gateway".into(),
            namespace: namespace.into(),
            updated: Utc::now(),
            status: ReleaseStatus::Deployed,
            revision: 1,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    pub fn deployed(&self) -> Vec<DeploymentSpec> {
        self.state.lock().deployed.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl DeploymentBackend for FakeBackend {
    async fn init(&self, spec: &DeploymentSpec) -> Result<(), BackendError> {
        self.record(format!("init {}", spec.namespace));
        Ok(())
    }

    async fn deploy(&self, spec: &DeploymentSpec) -> Result<(), BackendError> {
        self.record(format!("deploy {}", spec.namespace));
        let mut state = self.state.lock();
        if state.deploy_failures > 0 {
            state.deploy_failures -= 1;
            return Err(BackendError::unavailable("chart install failed"));
        }
        state.deployed.push(spec.clone());
        Ok(())
    }

    async fn is_ready(
        &self,
        namespace: &Namespace,
        _deployment_type: &str,
    ) -> Result<bool, BackendError> {
        self.record(format!("is_ready {namespace}"));
        Ok(self
            .state
            .lock()
            .ready
            .get(namespace.as_str())
            .copied()
            .unwrap_or(false))
    }

    async fn get_hostname(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
    ) -> Result<String, BackendError> {
        self.record(format!("get_hostname {namespace}"));
        Ok(format!("{deployment_type}.{namespace}.svc:8080"))
    }

    async fn verify_access(&self, address: &str) -> Result<bool, BackendError> {
        self.record(format!("verify_access {address}"));
        Ok(self.state.lock().access_ok)
    }

    async fn delete(
        &self,
        namespace: &Namespace,
        _deployment_type: &str,
        options: DeleteOptions,
    ) -> Result<(), BackendError> {
        self.record(format!(
            "delete {namespace} namespace={} release={}",
            options.delete_namespace, options.delete_release
        ));
        if self.state.lock().delete_fails {
            return Err(BackendError::unavailable("cluster unreachable"));
        }
        Ok(())
    }

    async fn list_releases(&self) -> Result<Vec<Release>, BackendError> {
        self.record("list_releases".into());
        Ok(self.state.lock().releases.clone())
    }
}

/// All loops over one in-memory store, a scripted API and a fake backend.
pub struct Harness {
    pub api: Arc<ScriptedConfigApi>,
    pub backend: Arc<FakeBackend>,
    pub keys: Keyspace,
    ctx: LoopContext,
}

impl Harness {
    pub fn new(zone: &str) -> Self {
        Self::with_config(OperatorConfig::for_zone(zone, "http://config.invalid"))
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        init_tracing();
        let api = ScriptedConfigApi::new();
        let backend = FakeBackend::new();
        let ctx = LoopContext::new(
            Arc::new(config),
            StateStore::in_memory(),
            api.clone(),
            backend.clone(),
        );
        Self {
            api,
            backend,
            keys: ctx.keys.clone(),
            ctx,
        }
    }

    /// Run one iteration of a loop.
    pub async fn run(&self, kind: LoopKind) -> Observations {
        kind.build(&self.ctx).iterate().await.unwrap()
    }

    /// Flag a hostname as awaiting initialization, as the ingress does.
    pub async fn request(&self, hostname: &str) {
        self.keys
            .hostname_initialize()
            .set(&host(hostname), "")
            .await
            .unwrap();
    }

    pub async fn hostname_error(&self, hostname: &str) -> Option<String> {
        self.keys.hostname_error().get(&host(hostname)).await.unwrap()
    }

    pub async fn is_ready(&self, worker_id: &str) -> bool {
        self.keys
            .worker_ready_for_deployment()
            .exists(&worker(worker_id))
            .await
            .unwrap()
    }

    pub async fn is_waiting(&self, worker_id: &str) -> bool {
        self.keys
            .worker_waiting_for_deployment()
            .exists(&worker(worker_id))
            .await
            .unwrap()
    }

    pub async fn is_initializing(&self, hostname: &str) -> bool {
        self.keys
            .hostname_initialize()
            .exists(&host(hostname))
            .await
            .unwrap()
    }

    /// Every key currently in the ingress and internal pools.
    pub async fn all_keys(&self) -> Vec<String> {
        let store = self.keys.store();
        let mut keys = store.ingress.connection().await.unwrap().keys_with_prefix("").await.unwrap();
        keys.extend(store.internal.connection().await.unwrap().keys_with_prefix("").await.unwrap());
        keys.sort();
        keys
    }
}
