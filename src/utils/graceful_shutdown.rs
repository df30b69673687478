use std::{future::Future, time::Duration};

use eyre::Result;
use tokio::{signal, sync::watch, time::timeout};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Force shutdown (drain window exceeded)
    Force,
}

/// Coordinates shutdown: turns OS signals into a shutdown notification and
/// bounds the time spent draining in-flight requests.
pub struct GracefulShutdown {
    shutdown_tx: watch::Sender<Option<ShutdownReason>>,
    /// Maximum time to wait for in-flight requests after the signal
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            shutdown_tx,
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_tx.borrow().is_some()
    }

    /// Manually trigger shutdown. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let first = self.shutdown_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!("Shutdown triggered: {:?}", reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Listen for SIGINT / SIGTERM and trigger a graceful shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            result = wait_for_sigterm() => {
                result?;
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger_shutdown(ShutdownReason::Graceful);
        Ok(())
    }

    /// Resolve once shutdown has been triggered, however long ago.
    pub fn wait_for_shutdown_signal(&self) -> impl Future<Output = ShutdownReason> + Send + 'static {
        let mut receiver = self.shutdown_tx.subscribe();
        async move {
            match receiver.wait_for(Option::is_some).await {
                Ok(reason) => reason.unwrap_or(ShutdownReason::Force),
                Err(_) => {
                    tracing::warn!("Shutdown channel closed unexpectedly");
                    ShutdownReason::Force
                }
            }
        }
    }

    /// Wait for `in_flight` to finish, but no longer than the drain window.
    pub async fn drain<F>(&self, in_flight: F) -> ShutdownReason
    where
        F: Future,
    {
        match timeout(self.drain_timeout, in_flight).await {
            Ok(_) => {
                tracing::info!("All in-flight requests drained");
                ShutdownReason::Graceful
            }
            Err(_) => {
                tracing::error!(
                    "Shutdown timeout exceeded ({:?}), forcing shutdown",
                    self.drain_timeout
                );
                ShutdownReason::Force
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> std::io::Result<()> {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
    Ok(())
}
