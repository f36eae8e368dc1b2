// ABOUTME: Per-loop guard conditions and legal transitions over the shared keyspace.
// ABOUTME: Every check re-reads the store; no flow trusts state from a previous iteration.

mod deleter;
mod deployer;
mod initializer;
mod updater;
mod waiter;

pub use deleter::{DeleteDecision, DeleterFlow};
pub use deployer::{DeployFailure, DeployerFlow};
pub use initializer::{InitOutcome, InitializerFlow};
pub use updater::{UpdateAction, UpdaterFlow};
pub use waiter::{WaitState, WaiterFlow};

use crate::backend::BackendError;
use crate::store::StoreError;

/// Errors raised while acting on a single candidate.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("state store: {0}")]
    Store(#[from] StoreError),

    #[error("deployment backend: {0}")]
    Backend(#[from] BackendError),
}
