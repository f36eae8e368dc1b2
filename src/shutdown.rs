// ABOUTME: Cooperative shutdown token shared by every loop in the process.
// ABOUTME: Set once by SIGTERM/SIGINT; loops check it between iterations and while sleeping.

use std::time::Duration;
use tokio::sync::watch;

/// Cloneable cancellation token. Every clone observes the same trigger.
#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: std::sync::Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
            receiver,
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        // Sender lives in self, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `false` if woken by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }

    /// Trigger this token on the first SIGTERM or SIGINT.
    pub fn listen_for_signals(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let shutdown = self.clone();
        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, finishing current iteration"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, finishing current iteration"),
            }
            shutdown.trigger();
        }))
    }
}
