// ABOUTME: The five reconciliation loops and the shared context they run with.
// ABOUTME: Each loop reads candidates, acts on each independently and reports observations.

mod deleter;
mod deployer;
mod initializer;
mod scheduler;
mod updater;
mod waiter;

pub use deleter::DeleterLoop;
pub use deployer::DeployerLoop;
pub use initializer::InitializerLoop;
pub use scheduler::run_loop;
pub use updater::UpdaterLoop;
pub use waiter::WaiterLoop;

use crate::backend::DeploymentBackend;
use crate::config::OperatorConfig;
use crate::diagnostics::Observations;
use crate::flow::FlowError;
use crate::store::{Keyspace, StateStore};
use crate::volume_config::{ConfigApi, VolumeConfigResolver};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One pass over a loop's candidates.
///
/// `iterate` fails only when candidates cannot be enumerated; per-candidate
/// errors land in the returned observations.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn iterate(&self) -> Result<Observations, FlowError>;
}

/// Everything a loop needs, built once at startup.
#[derive(Clone)]
pub struct LoopContext {
    pub config: Arc<OperatorConfig>,
    pub keys: Keyspace,
    pub resolver: VolumeConfigResolver,
    pub backend: Arc<dyn DeploymentBackend>,
}

impl LoopContext {
    pub fn new(
        config: Arc<OperatorConfig>,
        store: StateStore,
        api: Arc<dyn ConfigApi>,
        backend: Arc<dyn DeploymentBackend>,
    ) -> Self {
        let keys = Keyspace::new(store);
        Self {
            resolver: VolumeConfigResolver::new(api, keys.clone()),
            config,
            keys,
            backend,
        }
    }

    /// Release name used for every worker's deployment.
    pub fn deployment_type(&self) -> &str {
        &self.config.backend.deployment_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Initializer,
    Deployer,
    Waiter,
    Deleter,
    Updater,
}

impl LoopKind {
    pub const ALL: [LoopKind; 5] = [
        LoopKind::Initializer,
        LoopKind::Deployer,
        LoopKind::Waiter,
        LoopKind::Deleter,
        LoopKind::Updater,
    ];

    pub fn build(self, ctx: &LoopContext) -> Box<dyn Reconciler> {
        match self {
            LoopKind::Initializer => Box::new(InitializerLoop::new(ctx.clone())),
            LoopKind::Deployer => Box::new(DeployerLoop::new(ctx.clone())),
            LoopKind::Waiter => Box::new(WaiterLoop::new(ctx.clone())),
            LoopKind::Deleter => Box::new(DeleterLoop::new(ctx.clone())),
            LoopKind::Updater => Box::new(UpdaterLoop::new(ctx.clone())),
        }
    }

    pub fn interval(self, config: &OperatorConfig) -> Duration {
        match self {
            LoopKind::Initializer => config.initializer.interval,
            LoopKind::Deployer => config.deployer.interval,
            LoopKind::Waiter => config.waiter.interval,
            LoopKind::Deleter => config.deleter.interval,
            LoopKind::Updater => config.updater.interval,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Initializer => "initializer",
            LoopKind::Deployer => "deployer",
            LoopKind::Waiter => "waiter",
            LoopKind::Deleter => "deleter",
            LoopKind::Updater => "updater",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
