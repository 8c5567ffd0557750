pub mod cancel;
pub mod client;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use client::{ChatClient, ClientUpdate};
pub use conversation::{
    ChunkEffect, Conversation, Message, PendingRejection, Role, STREAM_ABORTED_PLACEHOLDER,
    SessionStatus,
};
pub use error::{ClientError, ClientResult};
pub use ids::{MessageId, SessionId};
pub use protocol::{
    ChunkPayload, Citation, ControlStatus, FrameDecoder, Framing, StreamChunk, StreamFault,
    StreamProtocol, TokenUsage,
};
pub use request::{ChatRequest, ClientDefaults, RequestMessage, SendOptions};
pub use session::{
    SESSION_EVENT_CAPACITY, SessionEvent, SessionEventPayload, SessionHandle, SessionWorker,
    StreamSession, StreamTarget,
};
pub use transport::{ByteSource, ChatTransport, HttpTransport, ReadOutcome, TransportResponse};
