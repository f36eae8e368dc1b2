// ABOUTME: Waiter loop: polls readiness of submitted deployments and publishes them.
// ABOUTME: Expired waits become terminal errors or, after a failed deploy, a retry.

use super::{LoopContext, Reconciler};
use crate::diagnostics::Observations;
use crate::flow::{FlowError, WaitState, WaiterFlow};
use crate::store::WaitingMarker;
use crate::types::{Namespace, WorkerId};
use async_trait::async_trait;
use chrono::Utc;

pub struct WaiterLoop {
    ctx: LoopContext,
    flow: WaiterFlow,
}

impl WaiterLoop {
    pub fn new(ctx: LoopContext) -> Self {
        let flow = WaiterFlow::new(ctx.keys.clone(), ctx.config.waiter.clone());
        Self { ctx, flow }
    }

    async fn check_worker(&self, worker_id: &WorkerId) -> Result<&'static str, FlowError> {
        let (since, marker) = match self.flow.check(worker_id).await? {
            WaitState::Gone => return Ok("gone"),
            WaitState::Stale => return Ok("stale"),
            WaitState::Suppressed => return Ok("suppressed"),
            WaitState::Waiting { since, marker } => (since, marker),
        };

        let config = self.ctx.resolver.by_worker_id(worker_id, false).await;
        if let Some(error) = &config.error {
            tracing::warn!(worker_id = %worker_id, error = %error, "cannot resolve volume config while waiting");
            return Ok("config_unavailable");
        }

        // After a failed deploy call the old release may still be ready;
        // only a fresh deployment is probed.
        if marker == WaitingMarker::Deploying {
            let namespace = Namespace::for_worker(worker_id);
            let deployment_type = self.ctx.deployment_type();
            let backend = self.ctx.backend.as_ref();
            if backend.is_ready(&namespace, deployment_type).await? {
                let address = backend.get_hostname(&namespace, deployment_type).await?;
                if !self.flow.verify_access() || backend.verify_access(&address).await? {
                    self.flow
                        .mark_available(worker_id, &config.hostnames, &address)
                        .await?;
                    return Ok("available");
                }
                tracing::debug!(worker_id = %worker_id, address = %address, "ready but not yet reachable");
            }
        }

        if self.flow.timed_out(since, marker, Utc::now()) {
            let outcome = self.flow.expire(worker_id, &config.hostnames, marker).await?;
            return Ok(if outcome.is_some() { "error" } else { "retry" });
        }
        Ok("waiting")
    }
}

#[async_trait]
impl Reconciler for WaiterLoop {
    fn name(&self) -> &'static str {
        "waiter"
    }

    async fn iterate(&self) -> Result<Observations, FlowError> {
        let mut observations = Observations::default();
        for worker_id in self.flow.candidates().await? {
            match self.check_worker(&worker_id).await {
                Ok(outcome) => observations.record(outcome),
                Err(e) => observations.fail(&worker_id, e),
            }
        }
        Ok(observations)
    }
}
