// ABOUTME: Fixed-interval scheduler shared by every reconciliation loop.
// ABOUTME: Iterations always run to completion; shutdown is honoured between them.

use super::Reconciler;
use crate::flow::FlowError;
use crate::shutdown::Shutdown;
use std::time::Duration;

/// Run `reconciler` every `interval` until shutdown.
///
/// With `once` a single iteration runs and its error, if any, is returned.
/// Otherwise iteration errors are logged and the loop carries on. Returns
/// the number of iterations run.
pub async fn run_loop(
    reconciler: &dyn Reconciler,
    interval: Duration,
    shutdown: &Shutdown,
    once: bool,
) -> Result<u64, FlowError> {
    let name = reconciler.name();
    let mut iterations = 0;
    tracing::info!(loop_name = name, interval = ?interval, "loop started");

    while !shutdown.is_triggered() {
        let result = reconciler.iterate().await;
        iterations += 1;
        match result {
            Ok(observations) => observations.log(name),
            Err(e) if once => return Err(e),
            Err(e) => tracing::error!(loop_name = name, "iteration failed: {}", e),
        }
        if once || !shutdown.sleep(interval).await {
            break;
        }
    }

    tracing::info!(loop_name = name, iterations, "loop stopped");
    Ok(iterations)
}
