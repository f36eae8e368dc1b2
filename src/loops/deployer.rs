// ABOUTME: Deployer loop: builds the deployment spec for ready workers and deploys it.
// ABOUTME: Backend failures consume the worker's attempt budget through the deployer flow.

use super::{LoopContext, Reconciler};
use crate::backend::{BackendError, DeploymentBackend, DeploymentSpec};
use crate::diagnostics::Observations;
use crate::flow::{DeployFailure, DeployerFlow, FlowError};
use crate::types::WorkerId;
use async_trait::async_trait;

pub struct DeployerLoop {
    ctx: LoopContext,
    flow: DeployerFlow,
}

impl DeployerLoop {
    pub fn new(ctx: LoopContext) -> Self {
        let flow = DeployerFlow::new(ctx.keys.clone(), ctx.config.deployer.max_attempts);
        Self { ctx, flow }
    }

    async fn deploy_worker(&self, worker_id: &WorkerId) -> Result<&'static str, FlowError> {
        if self.flow.is_suppressed(worker_id).await? {
            tracing::debug!(worker_id = %worker_id, "deployment suppressed by force delete");
            return Ok("suppressed");
        }

        let config = self.ctx.resolver.by_worker_id(worker_id, false).await;

        if !self.flow.is_legitimate(worker_id, &config.hostnames).await? {
            self.flow.drop_stale(worker_id).await?;
            return Ok("stale");
        }

        if let Some(error) = &config.error {
            tracing::warn!(worker_id = %worker_id, error = %error, "no volume config to deploy");
            let failure = self.flow.record_failure(worker_id, &config.hostnames).await?;
            return Ok(failure_label(failure));
        }

        let spec = DeploymentSpec::build(
            worker_id,
            self.ctx.deployment_type(),
            &self.ctx.config.deployer.values,
            &config,
        );

        match install(self.ctx.backend.as_ref(), &spec).await {
            Ok(()) => {
                self.flow.record_success(worker_id).await?;
                tracing::info!(worker_id = %worker_id, namespace = %spec.namespace, "deployment submitted");
                Ok("deployed")
            }
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, "deployment failed: {}", e);
                let failure = self.flow.record_failure(worker_id, &config.hostnames).await?;
                Ok(failure_label(failure))
            }
        }
    }
}

async fn install(backend: &dyn DeploymentBackend, spec: &DeploymentSpec) -> Result<(), BackendError> {
    backend.init(spec).await?;
    backend.deploy(spec).await
}

fn failure_label(failure: DeployFailure) -> &'static str {
    match failure {
        DeployFailure::Retry { .. } => "retry",
        DeployFailure::Exhausted { .. } => "error",
    }
}

#[async_trait]
impl Reconciler for DeployerLoop {
    fn name(&self) -> &'static str {
        "deployer"
    }

    async fn iterate(&self) -> Result<Observations, FlowError> {
        let mut observations = Observations::default();
        for worker_id in self.flow.candidates().await? {
            match self.deploy_worker(&worker_id).await {
                Ok(outcome) => observations.record(outcome),
                Err(e) => observations.fail(&worker_id, e),
            }
        }
        Ok(observations)
    }
}
