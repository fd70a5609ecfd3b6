//! Voice session controller
//!
//! Owns at most one room connection, drives the [`StateMachine`] from
//! transport events and exposes `start` / `stop` / `send_test_text`.
//!
//! Every start attempt gets a number. `stop()` and transport teardown bump
//! it, so an in-flight start that resumes after a teardown sees a stale
//! number, releases whatever it acquired and leaves state alone. Listener
//! events carry the number of the session that produced them and are
//! dropped once it is stale.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::events::{EndReason, SessionEvent};
use crate::state::{StateMachine, VoiceState};

use super::message::OutboundMessage;
use super::{
    Connection, InboundMessage, RemoteTrack, RoomHandle, SendOptions, SessionTransport,
    TokenIssuer, TrackKind, TransportEvent, VoiceError, VoiceToken,
};

/// Notice shown when the assistant leaves the room
pub const ASSISTANT_LEFT_NOTICE: &str = "Voice assistant disconnected";

/// Read model of the controller for UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: VoiceState,
    pub transcript: String,
    /// Room name while a session is live
    pub room: Option<String>,
}

/// The live connection and the channel that stops its listener
struct ActiveSession {
    attempt: u64,
    handle: Arc<dyn RoomHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

struct Inner {
    machine: StateMachine,
    transcript: String,
    session: Option<ActiveSession>,
    attempt: u64,
}

impl Inner {
    /// The session for `attempt` is the one currently held
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.session.as_ref().is_some_and(|s| s.attempt == attempt)
    }

    fn emit(&self, event: SessionEvent) {
        self.machine.emit(event);
    }

    fn set_transcript(&mut self, text: &str) {
        if self.transcript != text {
            self.transcript = text.to_string();
            self.emit(SessionEvent::TranscriptUpdated {
                text: self.transcript.clone(),
            });
        }
    }

    /// Invalidate the current attempt, reset to Idle and hand back the
    /// session so the caller can release it outside the lock.
    fn teardown(&mut self, reason: EndReason) -> Option<ActiveSession> {
        self.attempt += 1;
        let session = self.session.take();

        self.set_transcript("");
        self.machine.transition_to(VoiceState::Idle);

        if session.is_some() {
            self.emit(SessionEvent::SessionEnded { reason });
        }
        session
    }
}

struct Shared {
    inner: Mutex<Inner>,
    issuer: Arc<dyn TokenIssuer>,
    transport: Arc<dyn SessionTransport>,
    capture_enabled: bool,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Coordinates one voice session at a time. Cloning yields another handle
/// to the same controller.
#[derive(Clone)]
pub struct VoiceSessionController {
    shared: Arc<Shared>,
}

impl VoiceSessionController {
    /// Create an idle controller.
    ///
    /// With `capture_enabled` the microphone is published after connect and
    /// the session moves to Listening; without it the session stays in
    /// Connecting until the assistant speaks.
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        transport: Arc<dyn SessionTransport>,
        capture_enabled: bool,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let inner = Inner {
            machine: StateMachine::new(event_tx.clone()),
            transcript: String::new(),
            session: None,
            attempt: 0,
        };

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                issuer,
                transport,
                capture_enabled,
                event_tx,
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Current state
    pub async fn state(&self) -> VoiceState {
        self.shared.inner.lock().await.machine.state()
    }

    /// Current transcript
    pub async fn transcript(&self) -> String {
        self.shared.inner.lock().await.transcript.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock().await;
        SessionSnapshot {
            state: inner.machine.state(),
            transcript: inner.transcript.clone(),
            room: inner.session.as_ref().map(|s| s.handle.room_name().to_string()),
        }
    }

    /// Start a session. No-op while one is already live.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let attempt = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.machine.state();
            if state.is_active() {
                debug!(%state, "start ignored, session already live");
                return Ok(());
            }
            inner.attempt += 1;
            inner.machine.transition_to(VoiceState::Connecting);
            inner.attempt
        };

        info!(attempt, "starting voice session");

        match self.establish(attempt).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(attempt, &e).await;
                Err(e)
            }
        }
    }

    /// Stop the session if any and return to Idle. Always safe to call.
    pub async fn stop(&self) {
        self.end_session(None, EndReason::Stopped).await;
    }

    /// `stop()` when a session is live, otherwise `start()`
    pub async fn toggle(&self) -> Result<(), VoiceError> {
        if self.state().await.is_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    /// Send text to the assistant as if the user had said it.
    ///
    /// Without a connected room this starts a session instead and returns
    /// [`VoiceError::NotConnected`].
    pub async fn send_test_text(&self, text: &str) -> Result<(), VoiceError> {
        let current = {
            let inner = self.shared.inner.lock().await;
            inner
                .session
                .as_ref()
                .map(|s| (s.attempt, Arc::clone(&s.handle)))
        };

        let Some((attempt, handle)) = current else {
            warn!("room not connected, starting session");
            if let Err(e) = self.start().await {
                warn!(error = %e, "session start for test text failed");
            }
            return Err(VoiceError::NotConnected);
        };

        let payload = OutboundMessage::TestText {
            text: text.to_string(),
        }
        .encode()?;
        handle.send_data(&payload, SendOptions::reliable()).await?;

        let mut inner = self.shared.inner.lock().await;
        if inner.is_current(attempt) {
            inner.set_transcript(text);
            inner.machine.transition_to(VoiceState::Processing);
        }
        Ok(())
    }

    /// Token fetch, connect, listener install and microphone publish
    async fn establish(&self, attempt: u64) -> Result<(), VoiceError> {
        let VoiceToken {
            endpoint_url,
            access_token,
        } = self.shared.issuer.request_voice_token().await?;

        if self.shared.inner.lock().await.attempt != attempt {
            debug!(attempt, "start superseded during token fetch");
            return Ok(());
        }

        let Connection { handle, events } = self
            .shared
            .transport
            .connect(&endpoint_url, &access_token)
            .await?;
        let handle: Arc<dyn RoomHandle> = Arc::from(handle);
        let room = handle.room_name().to_string();

        let shutdown_rx = {
            let mut inner = self.shared.inner.lock().await;
            if inner.attempt != attempt {
                drop(inner);
                info!(%room, "stop requested while connecting, leaving room");
                handle.disconnect().await;
                return Ok(());
            }

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            inner.session = Some(ActiveSession {
                attempt,
                handle: Arc::clone(&handle),
                shutdown_tx,
            });
            inner.emit(SessionEvent::SessionStarted { room: room.clone() });
            shutdown_rx
        };

        info!(%room, "connected to room");
        self.spawn_session_notification(room);

        if self.shared.capture_enabled {
            handle.publish_local_audio().await?;

            let mut inner = self.shared.inner.lock().await;
            if !inner.is_current(attempt) {
                debug!(attempt, "session ended during microphone publish");
                return Ok(());
            }
            // send_test_text may already have moved the session on
            if inner.machine.state() == VoiceState::Connecting {
                inner.machine.transition_to(VoiceState::Listening);
            }
        } else {
            debug!("audio capture disabled, microphone not published");
        }

        // Events are buffered in `events` since connect, none are lost by
        // starting the listener here.
        tokio::spawn(self.clone().listen(attempt, events, shutdown_rx));

        Ok(())
    }

    /// Record a failed start attempt
    async fn fail(&self, attempt: u64, err: &VoiceError) {
        let session = {
            let mut inner = self.shared.inner.lock().await;
            if inner.attempt != attempt {
                debug!(attempt, error = %err, "superseded start attempt failed");
                return;
            }
            error!(error = %err, "voice session failed to start");
            inner.attempt += 1;
            let session = inner.session.take();
            inner.set_transcript("");
            inner.machine.transition_to(VoiceState::Error);
            session
        };

        if let Some(session) = session {
            session.handle.disconnect().await;
        }
    }

    /// Tear down the session. With `attempt` set, only if it is still current.
    async fn end_session(&self, attempt: Option<u64>, reason: EndReason) {
        let session = {
            let mut inner = self.shared.inner.lock().await;
            if let Some(attempt) = attempt {
                if !inner.is_current(attempt) {
                    return;
                }
            }
            if reason == EndReason::AssistantLeft {
                inner.emit(SessionEvent::Notice {
                    message: ASSISTANT_LEFT_NOTICE.to_string(),
                });
            }
            inner.teardown(reason)
        };

        let Some(session) = session else {
            return;
        };
        let _ = session.shutdown_tx.send(());

        // A transport that closed on its own needs no disconnect request.
        if reason != EndReason::TransportClosed {
            session.handle.disconnect().await;
        }
        info!(?reason, "voice session ended");
    }

    fn spawn_session_notification(&self, room: String) {
        let issuer = Arc::clone(&self.shared.issuer);
        tokio::spawn(async move {
            match issuer.notify_session_started(&room).await {
                Ok(message) => info!(%room, %message, "session start acknowledged"),
                Err(e) => warn!(%room, error = %e, "failed to notify session start"),
            }
        });
    }

    /// Per-session event loop
    async fn listen(
        self,
        attempt: u64,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!(attempt, "session listener started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,

                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(attempt, event).await,
                    None => {
                        self.handle_transport_event(
                            attempt,
                            TransportEvent::Disconnected {
                                reason: "event stream closed".to_string(),
                            },
                        )
                        .await;
                        break;
                    }
                },
            }
        }

        debug!(attempt, "session listener stopped");
    }

    async fn handle_transport_event(&self, attempt: u64, event: TransportEvent) {
        match event {
            TransportEvent::DataReceived(payload) => self.handle_data(attempt, &payload).await,
            TransportEvent::TrackSubscribed(track) => self.handle_track(attempt, track).await,
            TransportEvent::ParticipantDisconnected {
                identity,
                remote_participants,
            } => {
                info!(%identity, remote_participants, "participant disconnected");
                if remote_participants == 0 {
                    warn!("no remote participants left, closing session");
                    self.end_session(Some(attempt), EndReason::AssistantLeft).await;
                }
            }
            TransportEvent::Disconnected { reason } => {
                let err = VoiceError::UnexpectedDisconnect(reason);
                info!(error = %err, "transport closed");
                self.end_session(Some(attempt), EndReason::TransportClosed).await;
            }
        }
    }

    async fn handle_data(&self, attempt: u64, payload: &[u8]) {
        let message = match InboundMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping data message");
                return;
            }
        };

        let mut inner = self.shared.inner.lock().await;
        if !inner.is_current(attempt) {
            return;
        }

        let Some(next) = inner.machine.next_for_message(&message) else {
            match message {
                InboundMessage::Unknown => {
                    debug!(payload = %String::from_utf8_lossy(payload), "unknown message type");
                }
                other => debug!(?other, state = %inner.machine.state(), "message does not apply"),
            }
            return;
        };

        match &message {
            InboundMessage::SttPartial { text } | InboundMessage::SttFinal { text } => {
                inner.set_transcript(text);
            }
            InboundMessage::AiSpeaking | InboundMessage::Unknown => {}
        }
        inner.machine.transition_to(next);
    }

    async fn handle_track(&self, attempt: u64, track: RemoteTrack) {
        if track.kind != TrackKind::Audio {
            debug!(sid = %track.sid, kind = ?track.kind, "ignoring non-audio track");
            return;
        }

        let handle = {
            let inner = self.shared.inner.lock().await;
            match inner.session.as_ref() {
                Some(session) if inner.is_current(attempt) => Arc::clone(&session.handle),
                _ => return,
            }
        };

        match handle.attach_track(&track).await {
            Ok(()) => debug!(sid = %track.sid, "attached assistant audio"),
            Err(e) => warn!(sid = %track.sid, error = %e, "failed to attach audio track"),
        }
    }

    /// Attempt number of the live session, for driving handlers in tests
    #[cfg(test)]
    async fn current_attempt(&self) -> u64 {
        self.shared.inner.lock().await.attempt
    }
}
