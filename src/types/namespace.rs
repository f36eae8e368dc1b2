// ABOUTME: Deterministic cluster namespace derived from a worker id.
// ABOUTME: The mapping is reversible so listed releases can be traced back to workers.

use super::id::WorkerId;
use std::fmt;

pub const NAMESPACE_PREFIX: &str = "worker-";

/// Cluster resource grouping key for one worker's deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn for_worker(worker_id: &WorkerId) -> Self {
        Self(format!("{NAMESPACE_PREFIX}{worker_id}"))
    }

    /// Parse a namespace reported by the cluster.
    ///
    /// Returns `None` for namespaces this operator does not manage.
    pub fn parse(value: &str) -> Option<Self> {
        let suffix = value.strip_prefix(NAMESPACE_PREFIX)?;
        WorkerId::parse(suffix).ok().map(|id| Self::for_worker(&id))
    }

    pub fn worker_id(&self) -> WorkerId {
        WorkerId::new(&self.0[NAMESPACE_PREFIX.len()..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
