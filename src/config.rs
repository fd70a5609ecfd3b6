//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:7881";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Base URL of the task-manager API that issues voice tokens
    pub api_base_url: String,

    /// Bearer token of the signed-in user, if any
    pub api_token: Option<String>,

    /// WebSocket URL of the media-room bridge
    pub bridge_url: String,

    /// Publish the local microphone after connecting
    pub capture_enabled: bool,

    /// Timeout for token requests and bridge commands
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voice-session");

        let socket_path = data_dir.join("voice.sock");

        let capture_enabled = match lookup("VOICE_CAPTURE") {
            Some(value) => parse_flag(&value)
                .with_context(|| format!("invalid VOICE_CAPTURE {:?}", value))?,
            None => !cfg!(debug_assertions),
        };

        let request_timeout = match lookup("VOICE_REQUEST_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid VOICE_REQUEST_TIMEOUT_SECS {:?}", value))?;
                if secs == 0 {
                    bail!("VOICE_REQUEST_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        Ok(Self {
            socket_path,
            data_dir,
            api_base_url: lookup("VOICE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            api_token: lookup("VOICE_API_TOKEN").filter(|t| !t.is_empty()),
            bridge_url: lookup("VOICE_BRIDGE_URL")
                .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string()),
            capture_enabled,
            request_timeout,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {:?}", other),
    }
}
