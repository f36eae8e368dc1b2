// ABOUTME: Updater loop: reviews listed releases and flags workers for update or delete.
// ABOUTME: Tenant overrides suppress the action but it is still logged.

use super::{LoopContext, Reconciler};
use crate::backend::Release;
use crate::diagnostics::Observations;
use crate::flow::{FlowError, UpdateAction, UpdaterFlow};
use crate::types::{Namespace, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct UpdaterLoop {
    ctx: LoopContext,
    flow: UpdaterFlow,
}

impl UpdaterLoop {
    pub fn new(ctx: LoopContext) -> Self {
        let flow = UpdaterFlow::new(ctx.keys.clone(), ctx.config.updater.clone());
        Self { ctx, flow }
    }

    async fn review(
        &self,
        namespace: &Namespace,
        worker_id: &WorkerId,
        release: &Release,
        now: DateTime<Utc>,
    ) -> Result<&'static str, FlowError> {
        if self.flow.is_busy(worker_id).await? {
            return Ok("busy");
        }

        let last_action = self.ctx.keys.last_action(namespace).await?;
        let Some(action) = self.flow.decide(release, last_action, now) else {
            return Ok("current");
        };

        let config = self.ctx.resolver.by_worker_id(worker_id, false).await;
        let suppressed = if action.is_delete() {
            config.disable_force_delete
        } else {
            config.disable_force_update
        };
        if suppressed {
            tracing::info!(worker_id = %worker_id, revision = release.revision, "would {} but it is disabled for this tenant", action);
            return Ok("suppressed");
        }

        self.flow.apply(worker_id, action).await?;
        tracing::info!(worker_id = %worker_id, revision = release.revision, status = ?release.status, "{}", action);
        Ok(match action {
            UpdateAction::DeleteIdle => "force_delete",
            UpdateAction::RetryPending | UpdateAction::Refresh => "force_update",
        })
    }
}

#[async_trait]
impl Reconciler for UpdaterLoop {
    fn name(&self) -> &'static str {
        "updater"
    }

    async fn iterate(&self) -> Result<Observations, FlowError> {
        let mut observations = Observations::default();
        let now = Utc::now();
        for release in self.ctx.backend.list_releases().await? {
            let Some(namespace) = Namespace::parse(&release.namespace) else {
                observations.record("unmanaged");
                continue;
            };
            let worker_id = namespace.worker_id();
            match self.review(&namespace, &worker_id, &release, now).await {
                Ok(outcome) => observations.record(outcome),
                Err(e) => observations.fail(&worker_id, e),
            }
        }
        Ok(observations)
    }
}
