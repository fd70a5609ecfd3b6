//! Data-channel message definitions
//!
//! Frames are UTF-8 JSON objects with a required `type` field.

use serde::{Deserialize, Serialize};

use super::error::VoiceError;

/// Messages the voice agent sends over the data channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Interim speech-to-text result
    SttPartial {
        #[serde(default)]
        text: String,
    },

    /// Final speech-to-text result for an utterance
    SttFinal {
        #[serde(default)]
        text: String,
    },

    /// Assistant started speaking
    AiSpeaking,

    /// Any other `type` value
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Decode a raw data-channel payload
    pub fn decode(payload: &[u8]) -> Result<Self, VoiceError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| VoiceError::MessageDecode(format!("invalid utf-8: {}", e)))?;

        serde_json::from_str(text).map_err(|e| VoiceError::MessageDecode(e.to_string()))
    }
}

/// Messages the daemon sends over the data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Text injected as if the user had said it
    TestText { text: String },
}

impl OutboundMessage {
    /// Encode as a JSON byte payload
    pub fn encode(&self) -> Result<Vec<u8>, VoiceError> {
        serde_json::to_vec(self).map_err(|e| VoiceError::DataSend(e.to_string()))
    }
}
