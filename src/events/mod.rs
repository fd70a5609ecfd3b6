//! Events module for session observers
//!
//! Provides structured event types for state transitions, transcript
//! updates, session start/end and user-visible notices.

use serde::{Deserialize, Serialize};

use crate::state::VoiceState;

/// Why a session went back to Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `stop()` was called by the user or the daemon
    Stopped,
    /// Last remote participant left the room
    AssistantLeft,
    /// Transport reported a disconnect on its own
    TransportClosed,
}

/// Events emitted by the controller during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// State machine moved between two states
    StateChanged {
        from: VoiceState,
        to: VoiceState,
        /// Time spent in `from`, in milliseconds
        duration_ms: u64,
    },

    /// Transcript text changed
    TranscriptUpdated { text: String },

    /// Transport connected to a room
    SessionStarted { room: String },

    /// Session torn down
    SessionEnded { reason: EndReason },

    /// Message the UI should show to the user
    Notice { message: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to, duration_ms } => {
                write!(f, "STATE_CHANGED {} -> {} ({}ms)", from, to, duration_ms)
            }
            SessionEvent::TranscriptUpdated { text } => {
                write!(f, "TRANSCRIPT_UPDATED ({} chars)", text.chars().count())
            }
            SessionEvent::SessionStarted { room } => write!(f, "SESSION_STARTED ({})", room),
            SessionEvent::SessionEnded { reason } => write!(f, "SESSION_ENDED ({:?})", reason),
            SessionEvent::Notice { message } => write!(f, "NOTICE ({})", message),
        }
    }
}
