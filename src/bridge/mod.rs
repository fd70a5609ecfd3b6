//! Media-room bridge transport
//!
//! Implements `SessionTransport` over a WebSocket to an external bridge
//! process that owns the real media room.

mod client;
mod protocol;

pub use client::BridgeTransport;
