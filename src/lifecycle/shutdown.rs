//! Signal handling for graceful shutdown

use std::future::pending;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

/// Resolves on SIGTERM or SIGINT
pub struct ShutdownSignal;

impl ShutdownSignal {
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal.
    ///
    /// A signal whose handler cannot be installed is logged and never fires;
    /// the other one still does.
    pub async fn wait(&self) {
        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(?e, "failed to register SIGTERM handler");
                    pending::<()>().await;
                }
            }
        };

        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(?e, "failed to register SIGINT handler");
                pending::<()>().await;
            }
        };

        tokio::select! {
            _ = terminate => {
                debug!("received SIGTERM");
            }
            _ = interrupt => {
                debug!("received SIGINT");
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
