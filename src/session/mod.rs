//! Voice session module
//!
//! Provides the `VoiceSessionController` and the collaborators it is built
//! from:
//! - `TokenIssuer`: room credentials from the task-manager backend
//! - `SessionTransport` / `RoomHandle`: the real-time media connection
//! - `InboundMessage`: data-channel frames from the assistant

mod controller;
mod error;
mod message;
mod token;
mod transport;

pub use controller::{SessionSnapshot, VoiceSessionController};
pub use error::VoiceError;
pub use message::InboundMessage;
pub use token::{HttpTokenIssuer, TokenIssuer, VoiceToken};
pub use transport::{
    Connection, RemoteTrack, RoomHandle, SendOptions, SessionTransport, TrackKind, TransportEvent,
};
