//! Cancellation on SIGTERM and SIGINT.
//!
//! A signal cancels the shared token. In-flight store calls racing against
//! the token give up; archiving and extraction already running finish first.

use std::io;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel everything holding the token
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token
    pub async fn wait_for_signal(&self) -> io::Result<()> {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), cancelling...");
            }
            result = terminate() => {
                result?;
                info!("Received SIGTERM, cancelling...");
            }
            _ = self.token.cancelled() => return Ok(()),
        }

        self.trigger();
        Ok(())
    }

    /// Listen for signals in the background for the rest of the process
    pub fn listen(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.wait_for_signal().await {
                warn!("Failed to install signal handlers: {}", e);
            }
        })
    }
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    signal::unix::signal(signal::unix::SignalKind::terminate())?
        .recv()
        .await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    std::future::pending().await
}
