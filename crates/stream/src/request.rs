use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::conversation::Role;
use super::protocol::StreamProtocol;

/// One transcript entry reduced to what the answer service needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: Role,
    pub content: String,
}

impl RequestMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// JSON body posted to the answer service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
    pub metadata: Map<String, Value>,
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body keys owned by [`ChatRequest`]; extra fields never replace them.
const RESERVED_BODY_KEYS: [&str; 5] = ["messages", "repo_id", "file_paths", "metadata", "stream"];

/// Defaults applied to every send unless overridden.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientDefaults {
    pub protocol: StreamProtocol,
    pub repo_id: Option<String>,
    pub file_paths: Option<Vec<String>>,
    pub metadata: Map<String, Value>,
}

/// Per-send overrides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendOptions {
    pub protocol: Option<StreamProtocol>,
    pub repo_id: Option<String>,
    pub file_paths: Option<Vec<String>>,
    pub metadata: Map<String, Value>,
    /// Extra top-level body fields.
    pub extra: Map<String, Value>,
}

impl SendOptions {
    pub fn with_protocol(mut self, protocol: StreamProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn with_file_paths(mut self, file_paths: Vec<String>) -> Self {
        self.file_paths = Some(file_paths);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl ClientDefaults {
    /// Protocol in effect for a send with the given overrides.
    pub fn protocol_for(&self, options: &SendOptions) -> StreamProtocol {
        options.protocol.unwrap_or(self.protocol)
    }

    /// Builds the outbound body; per-send metadata keys win over defaults.
    pub fn build_request(&self, messages: Vec<RequestMessage>, options: SendOptions) -> ChatRequest {
        let mut metadata = self.metadata.clone();
        metadata.extend(options.metadata);

        let mut extra = options.extra;
        for key in RESERVED_BODY_KEYS {
            if extra.remove(key).is_some() {
                tracing::warn!(key, "ignoring extra body field that shadows a request field");
            }
        }

        ChatRequest {
            messages,
            repo_id: options.repo_id.or_else(|| self.repo_id.clone()),
            file_paths: options.file_paths.or_else(|| self.file_paths.clone()),
            metadata,
            stream: true,
            extra,
        }
    }
}
