//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SessionEvent;
use crate::session::{SessionSnapshot, VoiceError};
use crate::state::VoiceState;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current session status
    GetStatus,

    /// Start a voice session
    Start,

    /// Stop the voice session
    Stop,

    /// Stop if live, start otherwise
    Toggle,

    /// Inject text as if spoken (diagnostics)
    SendTestText { text: String },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to session event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current session status
    Status(DaemonStatus),

    /// Command accepted; state after it ran
    Ack { state: VoiceState },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl From<&VoiceError> for Response {
    fn from(err: &VoiceError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Session event occurred
    Event { event: SessionEvent },

    /// Subscriber fell behind and missed events
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current session state
    pub state: VoiceState,

    /// Latest transcript text
    pub transcript: String,

    /// Joined room, if a session is live
    pub room: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn from_snapshot(snapshot: SessionSnapshot, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: snapshot.state,
            transcript: snapshot.transcript,
            room: snapshot.room,
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SendTestText { text: "ping".into() };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"send_test_text","text":"ping"}"#);

        let req: Request = serde_json::from_str(r#"{"type":"toggle"}"#).unwrap();
        assert_eq!(req, Request::Toggle);
    }

    #[test]
    fn test_status_serialization() {
        let snapshot = SessionSnapshot {
            state: VoiceState::Listening,
            transcript: "hi".into(),
            room: Some("room-1".into()),
        };
        let resp = Response::Status(DaemonStatus::from_snapshot(snapshot, 5));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"state\":\"listening\""));
        assert!(json.contains("\"room\":\"room-1\""));
    }

    #[test]
    fn test_error_response_from_voice_error() {
        let resp = Response::from(&VoiceError::NotConnected);
        assert_eq!(
            resp,
            Response::Error {
                code: "not_connected".into(),
                message: "no voice session is connected".into(),
            }
        );
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::Event {
            event: SessionEvent::Notice {
                message: "bye".into(),
            },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, r#"{"type":"event","event":{"type":"notice","message":"bye"}}"#);
    }
}
