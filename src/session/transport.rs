//! Real-time session transport abstraction
//!
//! The media SDK sits behind these traits. The controller only sees a
//! connection handle and an event stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::VoiceError;

/// Kind of a remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    #[serde(other)]
    Other,
}

/// A remote track the transport subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Transport-assigned track id
    pub sid: String,
    pub kind: TrackKind,
}

/// Delivery options for a data-channel frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Retransmit until delivered (ordered, reliable channel)
    pub reliable: bool,
}

impl SendOptions {
    pub fn reliable() -> Self {
        Self { reliable: true }
    }
}

/// Lifecycle and data events reported by a connected transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes received on the data channel
    DataReceived(Vec<u8>),

    /// A remote track became available
    TrackSubscribed(RemoteTrack),

    /// A remote participant left the room
    ParticipantDisconnected {
        identity: String,
        /// Remote participants still in the room after this one left
        remote_participants: usize,
    },

    /// The connection itself closed
    Disconnected { reason: String },
}

/// A live connection returned by [`SessionTransport::connect`].
///
/// `events` is created before the connection is handed over, so every event
/// the transport reports after connect is buffered until the owner reads it.
pub struct Connection {
    pub handle: Box<dyn RoomHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to a signaling endpoint
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn connect(
        &self,
        endpoint_url: &str,
        access_token: &str,
    ) -> Result<Connection, VoiceError>;
}

/// Operations on one connected room
#[async_trait]
pub trait RoomHandle: Send + Sync {
    /// Name of the joined room
    fn room_name(&self) -> &str;

    /// Capture the local microphone, publish it and enable it
    async fn publish_local_audio(&self) -> Result<(), VoiceError>;

    /// Send a data-channel frame
    async fn send_data(&self, payload: &[u8], options: SendOptions) -> Result<(), VoiceError>;

    /// Route a remote track to local playback
    async fn attach_track(&self, track: &RemoteTrack) -> Result<(), VoiceError>;

    /// Leave the room. Must be safe to call on an already closed connection.
    async fn disconnect(&self);
}
