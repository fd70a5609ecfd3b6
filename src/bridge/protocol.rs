//! Media-room bridge message protocol
//!
//! Text frames carrying JSON objects tagged by `type`. Data-channel payloads
//! are base64 so arbitrary bytes survive the JSON envelope.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::{RemoteTrack, TrackKind, TransportEvent};

/// Commands from the daemon to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Join the room at `url` with `token`
    Join { url: String, token: String },

    /// Capture, publish and enable the local microphone
    PublishMicrophone { id: u64 },

    /// Play a subscribed remote track
    AttachTrack { id: u64, sid: String },

    /// Publish a data-channel frame
    Data {
        id: u64,
        payload: String,
        reliable: bool,
    },

    /// Leave the room and close the socket
    Leave,
}

impl BridgeCommand {
    pub fn data(id: u64, payload: &[u8], reliable: bool) -> Self {
        BridgeCommand::Data {
            id,
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            reliable,
        }
    }
}

/// Frames from the bridge to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Join succeeded
    Joined {
        room: String,
        #[serde(default)]
        remote_participants: usize,
    },

    /// Command `id` succeeded
    Ack { id: u64 },

    /// Command `id` failed
    Nack { id: u64, message: String },

    /// Join refused or bridge-level failure
    Error { message: String },

    TrackSubscribed { sid: String, kind: TrackKind },

    Data { payload: String },

    ParticipantDisconnected {
        identity: String,
        remote_participants: usize,
    },

    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl BridgeFrame {
    /// Convert a lifecycle frame into a transport event.
    ///
    /// Returns `None` for handshake/ack frames and for data frames whose
    /// payload is not valid base64.
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            BridgeFrame::TrackSubscribed { sid, kind } => {
                Some(TransportEvent::TrackSubscribed(RemoteTrack { sid, kind }))
            }
            BridgeFrame::Data { payload } => {
                match base64::engine::general_purpose::STANDARD.decode(payload.as_bytes()) {
                    Ok(bytes) => Some(TransportEvent::DataReceived(bytes)),
                    Err(e) => {
                        warn!(error = %e, "bridge sent data frame with invalid base64");
                        None
                    }
                }
            }
            BridgeFrame::ParticipantDisconnected {
                identity,
                remote_participants,
            } => Some(TransportEvent::ParticipantDisconnected {
                identity,
                remote_participants,
            }),
            BridgeFrame::Disconnected { reason } => Some(TransportEvent::Disconnected { reason }),
            BridgeFrame::Joined { .. }
            | BridgeFrame::Ack { .. }
            | BridgeFrame::Nack { .. }
            | BridgeFrame::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&BridgeCommand::data(7, b"hi", true)).unwrap();
        assert_eq!(json, r#"{"type":"data","id":7,"payload":"aGk=","reliable":true}"#);

        let json = serde_json::to_string(&BridgeCommand::Leave).unwrap();
        assert_eq!(json, r#"{"type":"leave"}"#);
    }

    #[test]
    fn test_data_frame_decodes_payload() {
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"data","payload":"aGk="}"#).unwrap();
        assert_eq!(frame.into_event(), Some(TransportEvent::DataReceived(b"hi".to_vec())));
    }

    #[test]
    fn test_invalid_base64_is_dropped() {
        let frame = BridgeFrame::Data {
            payload: "***".into(),
        };
        assert_eq!(frame.into_event(), None);
    }

    #[test]
    fn test_track_kind_fallback() {
        let json = r#"{"type":"track_subscribed","sid":"TR_1","kind":"screen_share"}"#;
        let frame: BridgeFrame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame.into_event(),
            Some(TransportEvent::TrackSubscribed(RemoteTrack {
                sid: "TR_1".into(),
                kind: TrackKind::Other,
            }))
        );
    }
}
