//! One request/response cycle against the answer service.
//!
//! A session runs as a detached worker future. It owns the network reads and
//! the frame decoder and reports what it saw as [`SessionEvent`]s tagged with
//! the session's [`StreamTarget`]. It never touches conversation state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::cancel::{CancelHandle, CancelToken, cancel_pair};
use super::ids::{MessageId, SessionId};
use super::protocol::{FrameDecoder, Framing, StreamChunk, StreamProtocol, parse_chunk};
use super::request::ChatRequest;
use super::transport::{ChatTransport, ReadOutcome};

/// Upper bound on how much of a failed response body is kept for its message.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Events buffered between the worker and its handle. A full queue pauses reads.
pub const SESSION_EVENT_CAPACITY: usize = 64;

pub type SessionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identity of a session and the assistant message it fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
    pub message_id: MessageId,
}

impl StreamTarget {
    pub fn new(session_id: SessionId, message_id: MessageId) -> Self {
        Self {
            session_id,
            message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub target: StreamTarget,
    pub payload: SessionEventPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventPayload {
    /// Response headers accepted; the body is decoded with `framing`.
    Opened { framing: Framing },
    Chunk(StreamChunk),
    /// The session ended without producing a usable stream.
    Failed(String),
    Cancelled,
    /// The body ended normally.
    Finished,
}

/// Receiving side of a running session. Dropping it cancels the worker.
pub struct SessionHandle {
    target: StreamTarget,
    events: mpsc::Receiver<SessionEvent>,
    cancel: CancelHandle,
}

impl SessionHandle {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Signals the worker to stop reading. Returns false when already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct StreamSession {
    target: StreamTarget,
    request: ChatRequest,
    protocol: StreamProtocol,
}

impl StreamSession {
    pub fn new(target: StreamTarget, request: ChatRequest, protocol: StreamProtocol) -> Self {
        Self {
            target,
            request,
            protocol,
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Splits the session into its handle and a worker future for the caller to spawn.
    pub fn start(self, transport: Arc<dyn ChatTransport>) -> (SessionHandle, SessionWorker) {
        let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
        let (cancel_handle, cancel_token) = cancel_pair();

        let handle = SessionHandle {
            target: self.target,
            events: event_rx,
            cancel: cancel_handle,
        };
        let worker: SessionWorker = Box::pin(self.run(transport, event_tx, cancel_token));

        (handle, worker)
    }

    async fn run(
        self,
        transport: Arc<dyn ChatTransport>,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancelToken,
    ) {
        let target = self.target;
        let emitter = Emitter { target, events };
        let accept = self.protocol.accept_header();

        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            endpoint = transport.endpoint().unwrap_or("<unset>"),
            accept,
            "opening chat stream"
        );

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = transport.open(&self.request, accept) => Some(opened),
        };

        let mut response = match opened {
            None => {
                tracing::debug!(session_id = %target.session_id, "cancelled before response headers");
                emitter.send(SessionEventPayload::Cancelled).await;
                return;
            }
            Some(Ok(response)) => response,
            Some(Err(error)) => {
                if cancel.is_cancelled() {
                    emitter.send(SessionEventPayload::Cancelled).await;
                } else {
                    tracing::error!(
                        session_id = %target.session_id,
                        error = %error,
                        "failed to open chat stream"
                    );
                    emitter.send(SessionEventPayload::Failed(error.to_string())).await;
                }
                return;
            }
        };

        if !response.is_success() {
            let status = response.status;
            let body = match response.read_to_end(&cancel, ERROR_BODY_LIMIT).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    emitter.send(SessionEventPayload::Cancelled).await;
                    return;
                }
                Err(error) => {
                    tracing::debug!(
                        session_id = %target.session_id,
                        status,
                        error = %error,
                        "failed to read error response body"
                    );
                    Vec::new()
                }
            };

            let message = failure_message(status, &body);
            tracing::warn!(
                session_id = %target.session_id,
                status,
                message = %message,
                "chat request rejected"
            );
            emitter.send(SessionEventPayload::Failed(message)).await;
            return;
        }

        let framing = self.protocol.resolve(response.content_type.as_deref());
        if !emitter.send(SessionEventPayload::Opened { framing }).await {
            return;
        }

        let mut decoder = FrameDecoder::new(framing);
        loop {
            match response.body.read(&cancel).await {
                Ok(ReadOutcome::Data(bytes)) => {
                    for frame in decoder.push(&bytes) {
                        let Some(chunk) = parse_chunk(&frame) else {
                            continue;
                        };
                        if !emitter.send(SessionEventPayload::Chunk(chunk)).await {
                            return;
                        }
                    }
                }
                Ok(ReadOutcome::End) => break,
                Ok(ReadOutcome::Cancelled) => {
                    tracing::debug!(session_id = %target.session_id, "chat stream cancelled");
                    emitter.send(SessionEventPayload::Cancelled).await;
                    return;
                }
                Err(error) => {
                    if cancel.is_cancelled() {
                        emitter.send(SessionEventPayload::Cancelled).await;
                    } else {
                        tracing::error!(
                            session_id = %target.session_id,
                            error = %error,
                            "chat stream read failed"
                        );
                        emitter.send(SessionEventPayload::Failed(error.to_string())).await;
                    }
                    return;
                }
            }
        }

        if let Some(residual) = decoder.finish() {
            match StreamChunk::from_json(&residual) {
                Ok(chunk) => {
                    emitter.send(SessionEventPayload::Chunk(chunk)).await;
                }
                Err(error) => {
                    tracing::debug!(
                        session_id = %target.session_id,
                        error = %error,
                        residual_len = residual.len(),
                        "discarding unterminated trailing frame"
                    );
                }
            }
        }

        tracing::debug!(session_id = %target.session_id, "chat stream finished");
        emitter.send(SessionEventPayload::Finished).await;
    }
}

struct Emitter {
    target: StreamTarget,
    events: mpsc::Sender<SessionEvent>,
}

impl Emitter {
    /// Returns false once the handle is gone and nobody is listening.
    async fn send(&self, payload: SessionEventPayload) -> bool {
        self.events
            .send(SessionEvent {
                target: self.target,
                payload,
            })
            .await
            .is_ok()
    }
}

/// Message for a rejected request: the service's own error text when the body
/// carries one, otherwise a generic line naming the status.
pub fn failure_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| service_error_text(&value))
        .unwrap_or_else(|| format!("Chat request failed ({status})"))
}

fn service_error_text(body: &Value) -> Option<String> {
    let text = match body.get("error")? {
        Value::String(message) => message.as_str(),
        Value::Object(error) => error.get("message")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
