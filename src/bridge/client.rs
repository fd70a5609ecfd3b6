//! WebSocket client for the media-room bridge
//!
//! The bridge process owns the real media room (audio capture, playback,
//! network resilience). This client joins a room through it, forwards
//! commands and turns bridge frames into [`TransportEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::session::{
    Connection, RemoteTrack, RoomHandle, SendOptions, SessionTransport, TransportEvent, VoiceError,
};

use super::protocol::{BridgeCommand, BridgeFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

/// Capacity of the per-connection event channel
const EVENT_BUFFER: usize = 64;

/// [`SessionTransport`] that talks to a local media-room bridge
#[derive(Debug, Clone)]
pub struct BridgeTransport {
    bridge_url: String,
    timeout: Duration,
}

impl BridgeTransport {
    /// `bridge_url` is the bridge WebSocket (e.g. "ws://127.0.0.1:7881").
    /// `timeout` bounds the join handshake and every acknowledged command.
    pub fn new(bridge_url: &str, timeout: Duration) -> Self {
        Self {
            bridge_url: bridge_url.to_string(),
            timeout,
        }
    }

    /// Read frames until the bridge accepts or refuses the join
    async fn await_join(read: &mut SplitStream<WsStream>) -> Result<(String, usize), VoiceError> {
        while let Some(msg) = read.next().await {
            let text = match msg {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => return Err(VoiceError::Connect(format!("bridge socket error: {}", e))),
            };

            match serde_json::from_str::<BridgeFrame>(&text) {
                Ok(BridgeFrame::Joined {
                    room,
                    remote_participants,
                }) => return Ok((room, remote_participants)),
                Ok(BridgeFrame::Error { message }) => return Err(VoiceError::Connect(message)),
                Ok(other) => debug!(?other, "ignoring frame before join"),
                Err(e) => warn!(error = %e, "invalid frame from bridge"),
            }
        }

        Err(VoiceError::Connect("bridge closed before join completed".to_string()))
    }

    fn spawn_writer(
        mut write: SplitSink<WsStream, WsMessage>,
        mut out_rx: mpsc::UnboundedReceiver<String>,
    ) {
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "bridge write failed");
                    break;
                }
            }
            let _ = write.close().await;
            debug!("bridge writer stopped");
        });
    }

    fn spawn_reader(
        mut read: SplitStream<WsStream>,
        pending: Pending,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let reason = loop {
                let text = match read.next().await {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "bridge closed connection".to_string());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break format!("bridge socket error: {}", e),
                    None => break "bridge connection lost".to_string(),
                };

                let frame = match serde_json::from_str::<BridgeFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "invalid frame from bridge");
                        continue;
                    }
                };

                match frame {
                    BridgeFrame::Ack { id } => Self::resolve(&pending, id, Ok(())).await,
                    BridgeFrame::Nack { id, message } => {
                        Self::resolve(&pending, id, Err(message)).await
                    }
                    BridgeFrame::Disconnected { reason } => break reason,
                    frame => {
                        if let Some(event) = frame.into_event() {
                            if event_tx.send(event).await.is_err() {
                                debug!("event receiver dropped, stopping bridge reader");
                                return;
                            }
                        }
                    }
                }
            };

            info!(%reason, "bridge connection closed");
            for (_, waiter) in pending.lock().await.drain() {
                let _ = waiter.send(Err(reason.clone()));
            }
            let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
        })
    }

    async fn resolve(pending: &Pending, id: u64, result: Result<(), String>) {
        match pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(id, "acknowledgement for unknown command"),
        }
    }
}

#[async_trait]
impl SessionTransport for BridgeTransport {
    async fn connect(
        &self,
        endpoint_url: &str,
        access_token: &str,
    ) -> Result<Connection, VoiceError> {
        info!(bridge = %self.bridge_url, endpoint = %endpoint_url, "joining room through bridge");

        let connect = tokio_tungstenite::connect_async(self.bridge_url.as_str());
        let (ws, _) = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| VoiceError::Connect("timed out reaching bridge".to_string()))?
            .map_err(|e| VoiceError::Connect(format!("bridge unreachable: {}", e)))?;
        let (mut write, mut read) = ws.split();

        let join = serde_json::to_string(&BridgeCommand::Join {
            url: endpoint_url.to_string(),
            token: access_token.to_string(),
        })
        .map_err(|e| VoiceError::Connect(e.to_string()))?;
        write
            .send(WsMessage::Text(join))
            .await
            .map_err(|e| VoiceError::Connect(format!("failed to send join: {}", e)))?;

        let joined = Self::await_join(&mut read);
        let (room, remote_participants) = tokio::time::timeout(self.timeout, joined)
            .await
            .map_err(|_| VoiceError::Connect("timed out waiting for join".to_string()))??;
        info!(%room, remote_participants, "joined room");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        Self::spawn_writer(write, out_rx);
        let reader = Self::spawn_reader(read, Arc::clone(&pending), event_tx);

        Ok(Connection {
            handle: Box::new(BridgeRoom {
                room,
                out_tx,
                pending,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                timeout: self.timeout,
                reader,
            }),
            events: event_rx,
        })
    }
}

/// One room joined through the bridge
struct BridgeRoom {
    room: String,
    out_tx: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    closed: AtomicBool,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl BridgeRoom {
    /// Send a command built with a fresh id and wait for its ack
    async fn request(&self, build: impl FnOnce(u64) -> BridgeCommand) -> Result<(), String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("room already left".to_string());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&build(id)).map_err(|e| e.to_string())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.out_tx.send(text).is_err() {
            self.pending.lock().await.remove(&id);
            return Err("bridge connection closed".to_string());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("bridge connection closed".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(format!("no acknowledgement within {}ms", self.timeout.as_millis()))
            }
        }
    }
}

#[async_trait]
impl RoomHandle for BridgeRoom {
    fn room_name(&self) -> &str {
        &self.room
    }

    async fn publish_local_audio(&self) -> Result<(), VoiceError> {
        self.request(|id| BridgeCommand::PublishMicrophone { id })
            .await
            .map_err(VoiceError::TrackPublish)
    }

    async fn send_data(&self, payload: &[u8], options: SendOptions) -> Result<(), VoiceError> {
        self.request(|id| BridgeCommand::data(id, payload, options.reliable))
            .await
            .map_err(VoiceError::DataSend)
    }

    async fn attach_track(&self, track: &RemoteTrack) -> Result<(), VoiceError> {
        let sid = track.sid.clone();
        self.request(|id| BridgeCommand::AttachTrack { id, sid })
            .await
            .map_err(VoiceError::Playback)
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(room = %self.room, "leaving room");
        match serde_json::to_string(&BridgeCommand::Leave) {
            Ok(text) => {
                if self.out_tx.send(text).is_err() {
                    debug!("bridge already closed");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode leave command"),
        }
    }
}

impl Drop for BridgeRoom {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    /// Accept one WebSocket connection and return it
    async fn fake_bridge() -> (String, JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (url, handle)
    }

    async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: serde_json::Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    fn transport(url: &str) -> BridgeTransport {
        BridgeTransport::new(url, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_session_through_bridge() {
        let (url, accept) = fake_bridge().await;

        let server = tokio::spawn(async move {
            let mut ws = accept.await.unwrap();

            let join = recv_json(&mut ws).await;
            assert_eq!(join["type"], "join");
            assert_eq!(join["url"], "wss://media.test");
            assert_eq!(join["token"], "tok");
            send_json(
                &mut ws,
                serde_json::json!({"type": "joined", "room": "room-1", "remote_participants": 1}),
            )
            .await;

            let publish = recv_json(&mut ws).await;
            assert_eq!(publish["type"], "publish_microphone");
            send_json(&mut ws, serde_json::json!({"type": "ack", "id": publish["id"]})).await;

            // {"type":"ai_speaking"}
            let payload = "eyJ0eXBlIjoiYWlfc3BlYWtpbmcifQ==";
            send_json(&mut ws, serde_json::json!({"type": "data", "payload": payload})).await;

            let data = recv_json(&mut ws).await;
            assert_eq!(data["type"], "data");
            assert_eq!(data["payload"], "cGluZw==");
            assert_eq!(data["reliable"], true);
            send_json(&mut ws, serde_json::json!({"type": "ack", "id": data["id"]})).await;

            send_json(
                &mut ws,
                serde_json::json!({
                    "type": "participant_disconnected",
                    "identity": "agent",
                    "remote_participants": 0,
                }),
            )
            .await;

            let leave = recv_json(&mut ws).await;
            assert_eq!(leave["type"], "leave");
            ws.close(None).await.ok();
        });

        let Connection { handle, mut events } =
            transport(&url).connect("wss://media.test", "tok").await.unwrap();
        assert_eq!(handle.room_name(), "room-1");

        handle.publish_local_audio().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::DataReceived(br#"{"type":"ai_speaking"}"#.to_vec()))
        );

        handle.send_data(b"ping", SendOptions::reliable()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::ParticipantDisconnected {
                identity: "agent".into(),
                remote_participants: 0,
            })
        );

        handle.disconnect().await;
        assert!(matches!(events.recv().await, Some(TransportEvent::Disconnected { .. })));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_join_refused() {
        let (url, accept) = fake_bridge().await;

        let server = tokio::spawn(async move {
            let mut ws = accept.await.unwrap();
            let _join = recv_json(&mut ws).await;
            send_json(&mut ws, serde_json::json!({"type": "error", "message": "invalid token"}))
                .await;
        });

        let err = match transport(&url).connect("wss://media.test", "bad").await {
            Ok(_) => panic!("join should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, VoiceError::Connect(ref msg) if msg == "invalid token"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_nack_is_track_publish_failure() {
        let (url, accept) = fake_bridge().await;

        let server = tokio::spawn(async move {
            let mut ws = accept.await.unwrap();
            let _join = recv_json(&mut ws).await;
            send_json(&mut ws, serde_json::json!({"type": "joined", "room": "room-1"})).await;
            let publish = recv_json(&mut ws).await;
            send_json(
                &mut ws,
                serde_json::json!({
                    "type": "nack",
                    "id": publish["id"],
                    "message": "microphone permission denied",
                }),
            )
            .await;
            // Hold the socket open until the client leaves.
            let _ = ws.next().await;
        });

        let connection = transport(&url).connect("wss://media.test", "tok").await.unwrap();
        let err = connection.handle.publish_local_audio().await.unwrap_err();
        assert!(matches!(err, VoiceError::TrackPublish(ref msg) if msg.contains("permission")));

        connection.handle.disconnect().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = match transport(&url).connect("wss://media.test", "tok").await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, VoiceError::Connect(_)));
    }

    #[tokio::test]
    async fn test_commands_after_leave_fail() {
        let (url, accept) = fake_bridge().await;

        let server = tokio::spawn(async move {
            let mut ws = accept.await.unwrap();
            let _join = recv_json(&mut ws).await;
            send_json(&mut ws, serde_json::json!({"type": "joined", "room": "room-1"})).await;
            let _ = ws.next().await;
        });

        let connection = transport(&url).connect("wss://media.test", "tok").await.unwrap();
        connection.handle.disconnect().await;
        connection.handle.disconnect().await;

        let err = connection
            .handle
            .send_data(b"late", SendOptions::reliable())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::DataSend(_)));
        server.await.unwrap();
    }
}
