// ABOUTME: Initializer loop: resolves configs for forced workers and awaiting hostnames.
// ABOUTME: Feeds every resolved hostname through the initializer flow in sorted order.

use super::{LoopContext, Reconciler};
use crate::diagnostics::Observations;
use crate::flow::{FlowError, InitOutcome, InitializerFlow};
use crate::types::{Hostname, WorkerErrorKind, WorkerId};
use crate::volume_config::VolumeConfig;
use async_trait::async_trait;
use std::collections::BTreeSet;

pub struct InitializerLoop {
    ctx: LoopContext,
}

impl InitializerLoop {
    pub fn new(ctx: LoopContext) -> Self {
        Self { ctx }
    }

    fn flow(&self) -> InitializerFlow {
        InitializerFlow::new(
            self.ctx.keys.clone(),
            self.ctx.config.cluster.zone.clone(),
            self.ctx.config.initializer.max_error_attempts,
        )
    }

    /// Refresh a forced worker's config and flag its hostnames.
    async fn reroute(
        &self,
        flow: &InitializerFlow,
        worker_id: &WorkerId,
    ) -> Result<(BTreeSet<Hostname>, VolumeConfig), FlowError> {
        let previous = self
            .ctx
            .resolver
            .cached(worker_id)
            .await
            .map(|config| config.hostnames)
            .unwrap_or_default();
        let refreshed = self.ctx.resolver.by_worker_id(worker_id, true).await;
        let covered = flow.reroute_forced(worker_id, &previous, &refreshed).await?;
        tracing::info!(worker_id = %worker_id, hostnames = covered.len(), "force update routed to initialization");
        Ok((covered, refreshed))
    }
}

fn label(outcome: &InitOutcome) -> &'static str {
    match outcome {
        InitOutcome::Ready(_) => "ready",
        InitOutcome::InFlight(_) => "in_flight",
        InitOutcome::Retrying { .. } => "retrying",
        InitOutcome::Failed(_) => "error",
        InitOutcome::Suppressed(_) => "suppressed",
    }
}

#[async_trait]
impl Reconciler for InitializerLoop {
    fn name(&self) -> &'static str {
        "initializer"
    }

    async fn iterate(&self) -> Result<Observations, FlowError> {
        let mut observations = Observations::default();
        let mut flow = self.flow();
        let mut resolved: Vec<(Hostname, VolumeConfig)> = Vec::new();
        let mut covered = BTreeSet::new();

        for worker_id in flow.force_update_candidates().await? {
            match self.reroute(&flow, &worker_id).await {
                Ok((hostnames, config)) => {
                    observations.record("force_update");
                    for hostname in hostnames {
                        resolved.push((hostname.clone(), config.clone()));
                        covered.insert(hostname);
                    }
                }
                Err(e) => observations.fail(&worker_id, e),
            }
        }

        for hostname in flow.awaiting_hostnames().await? {
            if covered.contains(&hostname) {
                continue;
            }
            let config = self.ctx.resolver.by_hostname(&hostname).await;
            resolved.push((hostname, config));
        }

        // Sorted so the earlier hostname wins a duplicate-config conflict.
        resolved.sort_by(|a, b| a.0.cmp(&b.0));

        for (hostname, config) in &resolved {
            match flow.advance(hostname, config).await {
                Ok(outcome) => {
                    if outcome == InitOutcome::Failed(WorkerErrorKind::DifferentVolumeConfigs)
                        && let Some(accepted) = config
                            .worker_id
                            .as_ref()
                            .and_then(|id| flow.accepted(id))
                    {
                        // The rejected lookup overwrote the cache entry.
                        self.ctx.resolver.remember(accepted).await;
                    }
                    observations.record(label(&outcome));
                }
                Err(e) => observations.fail(hostname, e),
            }
        }

        Ok(observations)
    }
}
