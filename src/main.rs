//! voice-session-daemon: Background daemon for the task manager's voice assistant
//!
//! This daemon runs next to the task-manager UI and provides:
//! - A voice session controller (connect, listen, transcribe, speak)
//! - Voice tokens from the task-manager API
//! - Room access through a local media-room bridge
//! - IPC server for UI control and session notifications
//!
//! Out of scope:
//! - Task, category and auth CRUD
//! - Media transport internals (owned by the bridge)

mod bridge;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod session;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::BridgeTransport;
use crate::config::Config;
use crate::events::SessionEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::session::{HttpTokenIssuer, VoiceSessionController};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voice-session-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        api = %config.api_base_url,
        bridge = %config.bridge_url,
        capture = config.capture_enabled,
        "configuration loaded"
    );
    if config.api_token.is_none() {
        warn!("VOICE_API_TOKEN not set, token requests will be unauthenticated");
    }

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Controller -> IPC subscribers and the event log below
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let issuer = HttpTokenIssuer::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout,
    )
    .context("failed to create token issuer")?;
    let transport = BridgeTransport::new(&config.bridge_url, config.request_timeout);

    let controller = VoiceSessionController::new(
        Arc::new(issuer),
        Arc::new(transport),
        config.capture_enabled,
        event_tx.clone(),
    );

    let server = Server::new(&config.socket_path, controller.clone())?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log session events
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "session event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("session event logger exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.stop().await;
    server.shutdown().await;

    info!("voice-session-daemon stopped");

    Ok(())
}
