//! Error taxonomy for voice sessions

use thiserror::Error;

/// Errors from the voice session and its collaborators.
///
/// `TokenFetch`, `Connect` and `TrackPublish` end a start attempt and put the
/// controller into the error state. `MessageDecode` and
/// `UnexpectedDisconnect` are handled inside event callbacks and never reach
/// a caller.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to fetch voice token: {0}")]
    TokenFetch(String),

    #[error("failed to connect transport: {0}")]
    Connect(String),

    #[error("failed to publish local audio: {0}")]
    TrackPublish(String),

    #[error("failed to decode data message: {0}")]
    MessageDecode(String),

    #[error("transport disconnected: {0}")]
    UnexpectedDisconnect(String),

    #[error("failed to send data message: {0}")]
    DataSend(String),

    #[error("failed to attach remote track: {0}")]
    Playback(String),

    #[error("no voice session is connected")]
    NotConnected,
}

impl VoiceError {
    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::TokenFetch(_) => "token_fetch_failure",
            VoiceError::Connect(_) => "connect_failure",
            VoiceError::TrackPublish(_) => "track_publish_failure",
            VoiceError::MessageDecode(_) => "message_decode_failure",
            VoiceError::UnexpectedDisconnect(_) => "unexpected_disconnect",
            VoiceError::DataSend(_) => "data_send_failure",
            VoiceError::Playback(_) => "playback_failure",
            VoiceError::NotConnected => "not_connected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(VoiceError::NotConnected.code(), "not_connected");
        assert_eq!(
            VoiceError::TokenFetch("401".into()).code(),
            "token_fetch_failure"
        );
    }

    #[test]
    fn test_error_display() {
        let err = VoiceError::Connect("refused".into());
        assert_eq!(err.to_string(), "failed to connect transport: refused");
    }
}
