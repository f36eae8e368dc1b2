// ABOUTME: Terminal error kinds recorded against hostnames.
// ABOUTME: Stored verbatim as the value of hostname error keys.

use std::fmt;
use std::str::FromStr;

/// Why a hostname stopped progressing.
///
/// All kinds are terminal until a force update or deletion clears the keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerErrorKind {
    FailedToGetVolumeConfig,
    InvalidVolumeZone,
    InvalidHostname,
    DifferentVolumeConfigs,
    FailedToDeploy,
    TimeoutWaitingForDeployment,
}

impl WorkerErrorKind {
    pub const ALL: [WorkerErrorKind; 6] = [
        WorkerErrorKind::FailedToGetVolumeConfig,
        WorkerErrorKind::InvalidVolumeZone,
        WorkerErrorKind::InvalidHostname,
        WorkerErrorKind::DifferentVolumeConfigs,
        WorkerErrorKind::FailedToDeploy,
        WorkerErrorKind::TimeoutWaitingForDeployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerErrorKind::FailedToGetVolumeConfig => "FAILED_TO_GET_VOLUME_CONFIG",
            WorkerErrorKind::InvalidVolumeZone => "INVALID_VOLUME_ZONE",
            WorkerErrorKind::InvalidHostname => "INVALID_HOSTNAME",
            WorkerErrorKind::DifferentVolumeConfigs => "DIFFERENT_VOLUME_CONFIGS",
            WorkerErrorKind::FailedToDeploy => "FAILED_TO_DEPLOY",
            WorkerErrorKind::TimeoutWaitingForDeployment => "TIMEOUT_WAITING_FOR_DEPLOYMENT",
        }
    }

    /// Whether this kind is only set after a retry budget is exhausted.
    ///
    /// Remote fetch and deploy failures can be transient. Zone, hostname and
    /// config mismatches are misconfiguration and are set on first sight.
    pub fn has_retry_budget(&self) -> bool {
        matches!(
            self,
            WorkerErrorKind::FailedToGetVolumeConfig | WorkerErrorKind::FailedToDeploy
        )
    }
}

impl fmt::Display for WorkerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown worker error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for WorkerErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}
