// ABOUTME: Deleter loop: tears down workloads of force-deleted workers.
// ABOUTME: Keys are cleared first; a failed backend delete re-arms the marker.

use super::{LoopContext, Reconciler};
use crate::backend::DeleteOptions;
use crate::diagnostics::Observations;
use crate::flow::{DeleteDecision, DeleterFlow, FlowError};
use crate::types::{Namespace, WorkerId};
use crate::volume_config::VolumeConfig;
use async_trait::async_trait;

pub struct DeleterLoop {
    ctx: LoopContext,
    flow: DeleterFlow,
}

impl DeleterLoop {
    pub fn new(ctx: LoopContext) -> Self {
        let flow = DeleterFlow::new(ctx.keys.clone());
        Self { ctx, flow }
    }

    fn options(&self) -> DeleteOptions {
        DeleteOptions {
            delete_namespace: self.ctx.config.deleter.delete_namespace,
            delete_release: self.ctx.config.deleter.delete_release,
        }
    }

    /// Config whose hostnames get cleared; a cached failure is refetched.
    async fn resolve(&self, worker_id: &WorkerId) -> VolumeConfig {
        match self.ctx.resolver.cached(worker_id).await {
            Some(config) if !config.is_error() => config,
            _ => self.ctx.resolver.by_worker_id(worker_id, true).await,
        }
    }

    async fn delete_worker(&self, worker_id: &WorkerId) -> Result<&'static str, FlowError> {
        let config = self.resolve(worker_id).await;
        if let Some(error) = &config.error {
            // Without hostnames the ingress keys would outlive the workload.
            tracing::warn!(worker_id = %worker_id, error = %error, "cannot resolve volume config, deletion postponed");
            return Ok("config_unavailable");
        }

        let marker = match self.flow.decide(worker_id, &config.hostnames).await? {
            DeleteDecision::Gone => return Ok("gone"),
            DeleteDecision::Cancelled => return Ok("cancelled"),
            DeleteDecision::Proceed(marker) => marker,
        };

        self.flow.clear(worker_id, &config.hostnames).await?;

        let namespace = Namespace::for_worker(worker_id);
        let result = self
            .ctx
            .backend
            .delete(&namespace, self.ctx.deployment_type(), self.options())
            .await;
        if let Err(e) = result {
            self.flow.rearm(worker_id, marker).await?;
            return Err(e.into());
        }

        tracing::info!(worker_id = %worker_id, namespace = %namespace, "worker deleted");
        Ok("deleted")
    }
}

#[async_trait]
impl Reconciler for DeleterLoop {
    fn name(&self) -> &'static str {
        "deleter"
    }

    async fn iterate(&self) -> Result<Observations, FlowError> {
        let mut observations = Observations::default();
        for worker_id in self.flow.candidates().await? {
            match self.delete_worker(&worker_id).await {
                Ok(outcome) => observations.record(outcome),
                Err(e) => observations.fail(&worker_id, e),
            }
        }
        Ok(observations)
    }
}
