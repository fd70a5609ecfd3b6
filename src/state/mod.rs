//! State machine module for the voice session lifecycle
//!
//! Provides an explicit state machine with six states:
//! - Idle: No session
//! - Connecting: Token fetch and transport connect in flight
//! - Listening / Processing / Speaking: Inferred remote assistant states
//! - Error: The last start attempt failed

mod machine;

pub use machine::{StateMachine, VoiceState};
