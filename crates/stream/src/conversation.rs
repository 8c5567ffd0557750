//! Transcript and session status owned by one chat surface.
//!
//! Every mutation that targets the streaming assistant message names the
//! message it expects to be pending. A mismatch is rejected without touching
//! state, which keeps a cancelled or superseded session from writing into a
//! newer turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::protocol::{ChunkPayload, Citation, ControlStatus, StreamChunk, TokenUsage};
use super::request::RequestMessage;

/// Content shown when a stream fails before producing any text.
pub const STREAM_ABORTED_PLACEHOLDER: &str = "[stream aborted]";

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Lifecycle of the current request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    Error,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            content: content.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
            usage: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates the empty assistant message that a stream fills in.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }
}

/// Observable result of applying one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEffect {
    ContentAppended,
    CitationsAppended(usize),
    Completed,
    Aborted,
    Failed,
    /// Accepted but carried nothing to apply.
    Ignored,
}

impl ChunkEffect {
    /// True when the chunk ended the stream for its message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// Rejection reason for operations aimed at a message that is not pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRejection {
    NoPendingMessage,
    MessageMismatch {
        pending: MessageId,
        attempted: MessageId,
    },
}

pub type ChunkResult = Result<ChunkEffect, PendingRejection>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conversation {
    initial: Vec<Message>,
    messages: Vec<Message>,
    status: SessionStatus,
    error: Option<String>,
    pending: Option<MessageId>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation seeded with messages that `reset` restores.
    pub fn with_initial(messages: Vec<Message>) -> Self {
        Self {
            initial: messages.clone(),
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Assistant message currently accepting chunks.
    pub fn pending(&self) -> Option<MessageId> {
        self.pending
    }

    pub fn is_streaming(&self) -> bool {
        self.status == SessionStatus::Streaming
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Transcript as sent upstream; blank assistant messages are left out.
    pub fn history(&self) -> Vec<RequestMessage> {
        self.messages
            .iter()
            .filter(|message| {
                message.role != Role::Assistant || !message.content.trim().is_empty()
            })
            .map(|message| RequestMessage::new(message.role, message.content.clone()))
            .collect()
    }

    /// Appends the user turn and a pending assistant placeholder.
    pub fn begin_turn(&mut self, utterance: impl Into<String>) -> MessageId {
        self.messages.push(Message::user(utterance));

        let placeholder = Message::assistant_placeholder();
        let assistant_id = placeholder.id;
        self.messages.push(placeholder);

        self.pending = Some(assistant_id);
        self.status = SessionStatus::Streaming;
        self.error = None;
        assistant_id
    }

    pub fn apply_chunk(&mut self, target: MessageId, chunk: &StreamChunk) -> ChunkResult {
        let index = self.pending_index(target)?;

        if let Some(usage) = chunk.usage {
            self.messages[index].usage = Some(usage);
        }

        let effect = match &chunk.payload {
            ChunkPayload::Token { delta } => {
                if delta.is_empty() {
                    ChunkEffect::Ignored
                } else {
                    self.messages[index].content.push_str(delta);
                    ChunkEffect::ContentAppended
                }
            }
            ChunkPayload::Citation { citations } => {
                if citations.is_empty() {
                    ChunkEffect::Ignored
                } else {
                    self.messages[index]
                        .citations
                        .extend(citations.iter().cloned());
                    ChunkEffect::CitationsAppended(citations.len())
                }
            }
            ChunkPayload::Control { status } => match status {
                ControlStatus::Completed => {
                    self.finish_pending(SessionStatus::Idle);
                    ChunkEffect::Completed
                }
                ControlStatus::Aborted => {
                    self.finish_pending(SessionStatus::Aborted);
                    ChunkEffect::Aborted
                }
                ControlStatus::InProgress | ControlStatus::Other(_) => ChunkEffect::Ignored,
            },
            ChunkPayload::Error { fault } => {
                let message = &mut self.messages[index];
                if message.content.is_empty() {
                    message.content = STREAM_ABORTED_PLACEHOLDER.to_string();
                }
                self.error = Some(fault.message.clone());
                self.finish_pending(SessionStatus::Error);
                ChunkEffect::Failed
            }
            ChunkPayload::Unknown { .. } => ChunkEffect::Ignored,
        };

        Ok(effect)
    }

    /// Ends the pending turn with an error and no added content.
    pub fn fail(
        &mut self,
        target: MessageId,
        message: impl Into<String>,
    ) -> Result<(), PendingRejection> {
        self.pending_index(target)?;
        self.error = Some(message.into());
        self.finish_pending(SessionStatus::Error);
        Ok(())
    }

    /// Records an error that prevented a turn from starting at all.
    pub fn report_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.pending = None;
        self.status = SessionStatus::Error;
    }

    /// Marks the active stream as cancelled. Returns false when nothing was streaming.
    pub fn abort(&mut self) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }

        self.finish_pending(SessionStatus::Aborted);
        true
    }

    /// Completes a stream that ended without a terminal control chunk.
    pub fn settle(&mut self, target: MessageId) -> Result<(), PendingRejection> {
        self.pending_index(target)?;
        if self.status == SessionStatus::Streaming {
            self.finish_pending(SessionStatus::Idle);
        } else {
            self.pending = None;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.messages = self.initial.clone();
        self.status = SessionStatus::Idle;
        self.error = None;
        self.pending = None;
    }

    fn pending_index(&self, target: MessageId) -> Result<usize, PendingRejection> {
        let Some(pending) = self.pending else {
            return Err(PendingRejection::NoPendingMessage);
        };

        if pending != target {
            return Err(PendingRejection::MessageMismatch {
                pending,
                attempted: target,
            });
        }

        self.messages
            .iter()
            .rposition(|message| message.id == pending)
            .ok_or(PendingRejection::NoPendingMessage)
    }

    fn finish_pending(&mut self, status: SessionStatus) {
        self.pending = None;
        self.status = status;
    }
}
