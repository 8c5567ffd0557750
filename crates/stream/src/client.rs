//! Chat client: the single writer of conversation state.
//!
//! Sends spawn a [`StreamSession`] worker; its events are applied here, one at
//! a time, between caller operations. Only events tagged with the active
//! session's [`StreamTarget`] reach the conversation.

use std::sync::Arc;

use super::conversation::{ChunkEffect, Conversation, Role, SessionStatus};
use super::error::MissingEndpointSnafu;
use super::ids::SessionId;
use super::protocol::{Framing, StreamChunk};
use super::request::{ClientDefaults, RequestMessage, SendOptions};
use super::session::{SessionEvent, SessionEventPayload, SessionHandle, StreamSession, StreamTarget};
use super::transport::ChatTransport;

/// Something the client applied to its conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Opened {
        target: StreamTarget,
        framing: Framing,
    },
    Applied {
        target: StreamTarget,
        chunk: StreamChunk,
        effect: ChunkEffect,
    },
    /// The session ended without a terminal chunk.
    Ended {
        target: StreamTarget,
        status: SessionStatus,
    },
}

pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    defaults: ClientDefaults,
    conversation: Conversation,
    active: Option<SessionHandle>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>, defaults: ClientDefaults) -> Self {
        Self {
            transport,
            defaults,
            conversation: Conversation::new(),
            active: None,
        }
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn status(&self) -> SessionStatus {
        self.conversation.status()
    }

    pub fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }

    pub fn active_target(&self) -> Option<StreamTarget> {
        self.active.as_ref().map(SessionHandle::target)
    }

    /// Starts a new turn and spawns its session on the current tokio runtime.
    ///
    /// Blank input is ignored. Any active session is cancelled first. Returns
    /// the new session's target, or `None` when no session was started.
    /// The worker buffers at most [`crate::SESSION_EVENT_CAPACITY`] events, so
    /// its reads pause until [`next_update`](Self::next_update) is polled again.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn send(&mut self, utterance: &str, options: SendOptions) -> Option<StreamTarget> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return None;
        }

        self.release_active();
        self.conversation.abort();

        if !self.transport.is_configured() {
            let error = MissingEndpointSnafu { stage: "send" }.build();
            tracing::warn!(error = %error, "refusing to send without an endpoint");
            self.conversation.report_error(error.to_string());
            return None;
        }

        let mut messages = self.conversation.history();
        messages.push(RequestMessage::new(Role::User, utterance));

        let protocol = self.defaults.protocol_for(&options);
        let request = self.defaults.build_request(messages, options);
        let message_id = self.conversation.begin_turn(utterance);
        let target = StreamTarget::new(SessionId::new_v7(), message_id);

        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            protocol = %protocol,
            history_len = request.messages.len(),
            "starting chat session"
        );

        let (handle, worker) =
            StreamSession::new(target, request, protocol).start(Arc::clone(&self.transport));
        tokio::spawn(worker);
        self.active = Some(handle);

        Some(target)
    }

    /// Waits for the active session's next event and applies it.
    ///
    /// Returns `None` once no session is active.
    pub async fn next_update(&mut self) -> Option<ClientUpdate> {
        loop {
            let handle = self.active.as_mut()?;
            let target = handle.target();

            match handle.recv().await {
                Some(event) => {
                    if let Some(update) = self.apply_event(event) {
                        return Some(update);
                    }
                }
                None => {
                    self.active = None;
                    tracing::warn!(
                        session_id = %target.session_id,
                        "session worker stopped without a final event"
                    );
                    return self
                        .conversation
                        .fail(target.message_id, "chat stream ended unexpectedly")
                        .ok()
                        .map(|()| ClientUpdate::Ended {
                            target,
                            status: self.conversation.status(),
                        });
                }
            }
        }
    }

    /// Drives the active session to its end and returns the resulting status.
    pub async fn run_until_settled(&mut self) -> SessionStatus {
        while self.next_update().await.is_some() {}
        self.status()
    }

    /// Applies one session event. Events from anything but the active session are dropped.
    pub fn apply_event(&mut self, event: SessionEvent) -> Option<ClientUpdate> {
        let SessionEvent { target, payload } = event;

        if self.active_target() != Some(target) {
            tracing::debug!(
                session_id = %target.session_id,
                message_id = %target.message_id,
                "dropping event from inactive session"
            );
            return None;
        }

        match payload {
            SessionEventPayload::Opened { framing } => {
                tracing::debug!(session_id = %target.session_id, framing = ?framing, "chat stream opened");
                Some(ClientUpdate::Opened { target, framing })
            }
            SessionEventPayload::Chunk(chunk) => {
                match self.conversation.apply_chunk(target.message_id, &chunk) {
                    Ok(effect) => {
                        if effect.is_terminal() {
                            self.active = None;
                        }
                        Some(ClientUpdate::Applied {
                            target,
                            chunk,
                            effect,
                        })
                    }
                    Err(rejection) => {
                        tracing::warn!(
                            session_id = %target.session_id,
                            kind = chunk.kind(),
                            rejection = ?rejection,
                            "chunk rejected by conversation"
                        );
                        None
                    }
                }
            }
            SessionEventPayload::Failed(message) => {
                self.active = None;
                self.conversation.fail(target.message_id, message).ok()?;
                Some(self.ended(target))
            }
            SessionEventPayload::Cancelled => {
                self.active = None;
                if self.conversation.pending() == Some(target.message_id) {
                    self.conversation.abort();
                }
                Some(self.ended(target))
            }
            SessionEventPayload::Finished => {
                self.active = None;
                self.conversation.settle(target.message_id).ok()?;
                Some(self.ended(target))
            }
        }
    }

    /// Cancels the active stream. Returns false when nothing was streaming.
    pub fn stop(&mut self) -> bool {
        if !self.conversation.is_streaming() {
            return false;
        }

        self.release_active();
        self.conversation.abort()
    }

    /// Cancels any active stream and restores the initial transcript.
    pub fn reset(&mut self) {
        self.release_active();
        self.conversation.reset();
    }

    fn ended(&self, target: StreamTarget) -> ClientUpdate {
        ClientUpdate::Ended {
            target,
            status: self.conversation.status(),
        }
    }

    fn release_active(&mut self) {
        if let Some(handle) = self.active.take() {
            tracing::debug!(session_id = %handle.target().session_id, "cancelling chat session");
            handle.cancel();
        }
    }
}
