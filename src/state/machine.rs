//! Core state machine implementation
//!
//! Tracks the assistant lifecycle (Idle, Connecting, Listening, Processing,
//! Speaking, Error) and computes transitions driven by data-channel messages.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::SessionEvent;
use crate::session::InboundMessage;

/// The six possible states of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    /// No session, waiting for `start`
    #[default]
    Idle,
    /// Token requested or transport connecting
    Connecting,
    /// Microphone published, user speech is being transcribed
    Listening,
    /// Final transcript delivered, assistant is working on a reply
    Processing,
    /// Assistant audio is playing
    Speaking,
    /// Last start attempt failed
    Error,
}

impl VoiceState {
    /// Whether a session is live in this state (the UI shows the mic as on)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            VoiceState::Connecting
                | VoiceState::Listening
                | VoiceState::Processing
                | VoiceState::Speaking
        )
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceState::Idle => write!(f, "Idle"),
            VoiceState::Connecting => write!(f, "Connecting"),
            VoiceState::Listening => write!(f, "Listening"),
            VoiceState::Processing => write!(f, "Processing"),
            VoiceState::Speaking => write!(f, "Speaking"),
            VoiceState::Error => write!(f, "Error"),
        }
    }
}

/// Holds the authoritative state and announces every transition
pub struct StateMachine {
    /// Current state
    state: VoiceState,
    /// Time when current non-Idle state was entered
    state_entered_at: Option<Instant>,
    /// Channel for emitting session events
    event_tx: broadcast::Sender<SessionEvent>,
}

impl StateMachine {
    /// Create a new state machine in Idle
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            state: VoiceState::Idle,
            state_entered_at: None,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Compute the state an inbound message leads to.
    ///
    /// Returns `None` when the message does not move the machine: unknown
    /// message types, transcript messages with empty text, and transcript
    /// messages that arrive before the microphone is live.
    pub fn next_for_message(&self, message: &InboundMessage) -> Option<VoiceState> {
        match message {
            InboundMessage::SttPartial { text } => {
                self.compute_for_transcript(text, VoiceState::Listening)
            }
            InboundMessage::SttFinal { text } => {
                self.compute_for_transcript(text, VoiceState::Processing)
            }
            InboundMessage::AiSpeaking => {
                if self.state.is_active() {
                    Some(VoiceState::Speaking)
                } else {
                    None
                }
            }
            InboundMessage::Unknown => None,
        }
    }

    /// Transcript messages only apply once the session is listening or later
    fn compute_for_transcript(&self, text: &str, target: VoiceState) -> Option<VoiceState> {
        if text.is_empty() {
            return None;
        }
        match self.state {
            VoiceState::Listening | VoiceState::Processing | VoiceState::Speaking => Some(target),
            VoiceState::Idle | VoiceState::Connecting | VoiceState::Error => None,
        }
    }

    /// Perform a state transition. Returns false if already in `new_state`.
    pub fn transition_to(&mut self, new_state: VoiceState) -> bool {
        let old_state = self.state;
        if old_state == new_state {
            return false;
        }

        let duration_ms = self
            .state_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = if new_state != VoiceState::Idle {
            Some(Instant::now())
        } else {
            None
        };

        let event = SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
            duration_ms,
        };
        self.emit(event);

        true
    }

    /// Publish an event on the session bus
    pub fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}
