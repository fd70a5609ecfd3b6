//! Voice token issuer
//!
//! The task-manager backend hands out short-lived room credentials and is
//! told when a room session begins.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::VoiceError;

/// Credentials for one room connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceToken {
    /// Signaling endpoint of the media server
    #[serde(rename = "livekitUrl")]
    pub endpoint_url: String,
    /// Access token for that endpoint
    #[serde(rename = "livekitToken")]
    pub access_token: String,
}

/// Remote authority that issues voice tokens
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Fetch an `(endpoint, token)` pair for the authenticated user
    async fn request_voice_token(&self) -> Result<VoiceToken, VoiceError>;

    /// Tell the backend a room session started. Returns the server message.
    async fn notify_session_started(&self, room_name: &str) -> Result<String, VoiceError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    room_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(default)]
    message: String,
}

/// [`TokenIssuer`] backed by the task-manager REST API
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpTokenIssuer {
    /// Create an issuer for `base_url` (e.g. "http://localhost:5000/api")
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::TokenFetch(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, VoiceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| VoiceError::TokenFetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::TokenFetch(format!(
                "server returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| VoiceError::TokenFetch(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn request_voice_token(&self) -> Result<VoiceToken, VoiceError> {
        debug!(base_url = %self.base_url, "requesting voice token");
        self.send(self.client.get(self.url("/ai/voice/token"))).await
    }

    async fn notify_session_started(&self, room_name: &str) -> Result<String, VoiceError> {
        let request = self
            .client
            .post(self.url("/ai/voice/start"))
            .json(&StartRequest { room_name });
        let response: StartResponse = self.send(request).await?;
        Ok(response.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_deserialization() {
        let json = r#"{"livekitUrl":"wss://media.example","livekitToken":"abc","extra":1}"#;
        let token: VoiceToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.endpoint_url, "wss://media.example");
        assert_eq!(token.access_token, "abc");
    }

    #[test]
    fn test_start_request_is_camel_case() {
        let json = serde_json::to_string(&StartRequest { room_name: "room-1" }).unwrap();
        assert_eq!(json, r#"{"roomName":"room-1"}"#);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let timeout = Duration::from_secs(1);
        let issuer = HttpTokenIssuer::new("http://localhost:5000/api/", None, timeout).unwrap();
        assert_eq!(issuer.url("/ai/voice/token"), "http://localhost:5000/api/ai/voice/token");
    }

    /// Serve a single canned HTTP response and return the request head
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let head_len = buf
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|p| p + 4)
                .unwrap_or(buf.len());
            let content_length = String::from_utf8_lossy(&buf[..head_len])
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if !name.eq_ignore_ascii_case("content-length") {
                        return None;
                    }
                    value.trim().parse::<usize>().ok()
                })
                .unwrap_or(0);
            while buf.len() < head_len + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len(),
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&buf).into_owned()
        });

        (base_url, handle)
    }

    #[tokio::test]
    async fn test_request_voice_token_sends_bearer() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"livekitUrl":"wss://media.example","livekitToken":"tok"}"#,
        )
        .await;
        let issuer =
            HttpTokenIssuer::new(&base_url, Some("secret".into()), Duration::from_secs(5)).unwrap();

        let token = issuer.request_voice_token().await.unwrap();
        assert_eq!(token.endpoint_url, "wss://media.example");
        assert_eq!(token.access_token, "tok");

        let head = server.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /ai/voice/token"));
        assert!(head.contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_token_fetch_failure() {
        let (base_url, _server) =
            serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"expired"}"#).await;
        let issuer = HttpTokenIssuer::new(&base_url, None, Duration::from_secs(5)).unwrap();

        let err = issuer.request_voice_token().await.unwrap_err();
        assert!(matches!(err, VoiceError::TokenFetch(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_notify_session_started_returns_message() {
        let (base_url, server) =
            serve_once("HTTP/1.1 200 OK", r#"{"message":"agent dispatched"}"#).await;
        let issuer = HttpTokenIssuer::new(&base_url, None, Duration::from_secs(5)).unwrap();

        let message = issuer.notify_session_started("room-1").await.unwrap();
        assert_eq!(message, "agent dispatched");
        assert!(server.await.unwrap().starts_with("POST /ai/voice/start"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_token_fetch_failure() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let issuer =
            HttpTokenIssuer::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let err = issuer.request_voice_token().await.unwrap_err();
        assert!(matches!(err, VoiceError::TokenFetch(_)));
    }
}
