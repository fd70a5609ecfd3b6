//! Unix domain socket server for IPC
//!
//! Provides request-response control of the voice session and push
//! notifications of session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::session::VoiceSessionController;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

type Writer = Arc<Mutex<OwnedWriteHalf>>;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    controller: VoiceSessionController,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, controller: VoiceSessionController) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            controller,
            start_time: Instant::now(),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let controller = self.controller.clone();
                    let start_time = self.start_time;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, controller, start_time) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        controller: VoiceSessionController,
        start_time: Instant,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: Writer = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result =
            Self::serve_requests(&mut reader, &writer, &controller, start_time, &mut forwarder)
                .await;

        if let Some(task) = forwarder {
            task.abort();
        }
        result
    }

    async fn serve_requests(
        reader: &mut tokio::net::unix::OwnedReadHalf,
        writer: &Writer,
        controller: &VoiceSessionController,
        start_time: Instant,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let request: Request = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "failed to parse request");
                    let response = Response::Error {
                        code: "invalid_request".to_string(),
                        message: e.to_string(),
                    };
                    Self::send_message(writer, &response).await?;
                    continue;
                }
            };

            debug!(?request, "received request");

            if request == Request::Subscribe {
                // Subscribe before confirming so no event after the ack is missed.
                let events = controller.subscribe();
                Self::send_message(writer, &Response::Subscribed).await?;
                if forwarder.is_none() {
                    debug!("client subscribed to notifications");
                    *forwarder = Some(Self::spawn_forwarder(Arc::clone(writer), events));
                }
                continue;
            }

            let response = Self::process_request(request, controller, start_time).await;
            Self::send_message(writer, &response).await?;
        }
    }

    /// Forward session events to a subscribed client until it goes away
    fn spawn_forwarder(
        writer: Writer,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let notification = match events.recv().await {
                    Ok(event) => Notification::Event { event },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged");
                        Notification::Lagged { skipped }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Err(e) = Self::send_message(&writer, &notification).await {
                    debug!(?e, "notification delivery failed, dropping subscriber");
                    break;
                }
            }
        })
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(
        writer: &Mutex<OwnedWriteHalf>,
        msg: &T,
    ) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        let mut writer = writer.lock().await;
        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        controller: &VoiceSessionController,
        start_time: Instant,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let snapshot = controller.snapshot().await;
                let uptime_secs = start_time.elapsed().as_secs();
                Response::Status(DaemonStatus::from_snapshot(snapshot, uptime_secs))
            }

            Request::Start => Self::ack(controller, controller.start().await).await,

            Request::Stop => {
                controller.stop().await;
                Self::ack(controller, Ok(())).await
            }

            Request::Toggle => Self::ack(controller, controller.toggle().await).await,

            Request::SendTestText { text } => {
                Self::ack(controller, controller.send_test_text(&text).await).await
            }

            Request::Subscribe => Response::Subscribed,
        }
    }

    async fn ack(
        controller: &VoiceSessionController,
        result: Result<(), crate::session::VoiceError>,
    ) -> Response {
        match result {
            Ok(()) => Response::Ack {
                state: controller.state().await,
            },
            Err(e) => Response::from(&e),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
