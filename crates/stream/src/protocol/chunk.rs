use serde::{Deserialize, Serialize};

const FALLBACK_FAULT_CODE: &str = "stream_error";
const FALLBACK_FAULT_MESSAGE: &str = "the answer service reported an error";

/// Source reference attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Citation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Short human-readable location such as `src/lib.rs:10-24`.
    pub fn location(&self) -> String {
        let base = self
            .file_path
            .as_deref()
            .or(self.url.as_deref())
            .or(self.title.as_deref())
            .unwrap_or(self.id.as_str());

        match (self.start_line, self.end_line) {
            (Some(start), Some(end)) if end != start => format!("{base}:{start}-{end}"),
            (Some(start), _) => format!("{base}:{start}"),
            _ => base.to_string(),
        }
    }
}

/// Error reported by the service inside the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFault {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl Default for StreamFault {
    fn default() -> Self {
        Self {
            code: FALLBACK_FAULT_CODE.to_string(),
            message: FALLBACK_FAULT_MESSAGE.to_string(),
            retryable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlStatus {
    InProgress,
    Completed,
    Aborted,
    /// Missing or unrecognised status, kept for forward compatibility.
    Other(String),
}

impl ControlStatus {
    fn from_wire(raw: Option<String>) -> Self {
        match raw.as_deref() {
            Some("in_progress") => Self::InProgress,
            Some("completed") => Self::Completed,
            Some("aborted") => Self::Aborted,
            _ => Self::Other(raw.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Token { delta: String },
    Citation { citations: Vec<Citation> },
    Control { status: ControlStatus },
    Error { fault: StreamFault },
    /// A `type` tag this client does not know; callers ignore it.
    Unknown { kind: String },
}

/// One typed unit of streaming content.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Message id as labelled by the service.
    pub message_id: String,
    pub payload: ChunkPayload,
    pub usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(rename = "type")]
    kind: String,
    message_id: String,
    delta: Option<String>,
    citation: Option<Citation>,
    citations: Option<Vec<Citation>>,
    status: Option<String>,
    error: Option<StreamFault>,
    usage: Option<TokenUsage>,
}

impl From<WireChunk> for StreamChunk {
    fn from(wire: WireChunk) -> Self {
        let payload = match wire.kind.as_str() {
            "token" => ChunkPayload::Token {
                delta: wire.delta.unwrap_or_default(),
            },
            "citation" => {
                // Singular field first, then the plural list, both kept verbatim.
                let mut citations = Vec::new();
                citations.extend(wire.citation);
                citations.extend(wire.citations.unwrap_or_default());
                ChunkPayload::Citation { citations }
            }
            "control" => ChunkPayload::Control {
                status: ControlStatus::from_wire(wire.status),
            },
            "error" => {
                let mut fault = wire.error.unwrap_or_default();
                if fault.message.trim().is_empty() {
                    fault.message = FALLBACK_FAULT_MESSAGE.to_string();
                }
                ChunkPayload::Error { fault }
            }
            _ => ChunkPayload::Unknown { kind: wire.kind },
        };

        Self {
            message_id: wire.message_id,
            payload,
            usage: wire.usage,
        }
    }
}

impl StreamChunk {
    pub fn new(message_id: impl Into<String>, payload: ChunkPayload) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            usage: None,
        }
    }

    pub fn token(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(
            message_id,
            ChunkPayload::Token {
                delta: delta.into(),
            },
        )
    }

    pub fn citations(message_id: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self::new(message_id, ChunkPayload::Citation { citations })
    }

    pub fn control(message_id: impl Into<String>, status: ControlStatus) -> Self {
        Self::new(message_id, ChunkPayload::Control { status })
    }

    pub fn error(message_id: impl Into<String>, fault: StreamFault) -> Self {
        Self::new(message_id, ChunkPayload::Error { fault })
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<WireChunk>(payload).map(Self::from)
    }

    pub fn kind(&self) -> &str {
        match &self.payload {
            ChunkPayload::Token { .. } => "token",
            ChunkPayload::Citation { .. } => "citation",
            ChunkPayload::Control { .. } => "control",
            ChunkPayload::Error { .. } => "error",
            ChunkPayload::Unknown { kind } => kind,
        }
    }
}

/// Parses one frame payload, dropping it with a warning when it is malformed.
pub fn parse_chunk(payload: &str) -> Option<StreamChunk> {
    match StreamChunk::from_json(payload) {
        Ok(chunk) => {
            if let ChunkPayload::Unknown { kind } = &chunk.payload {
                tracing::debug!(kind = %kind, "forwarding chunk with unknown type");
            }
            Some(chunk)
        }
        Err(error) => {
            tracing::warn!(
                error = %error,
                payload_len = payload.len(),
                "dropping malformed stream frame"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_chunk() {
        let chunk = parse_chunk(r#"{"type":"token","message_id":"m1","delta":"Hel"}"#)
            .expect("token chunk should parse");

        assert_eq!(chunk.message_id, "m1");
        assert_eq!(
            chunk.payload,
            ChunkPayload::Token {
                delta: "Hel".to_string()
            }
        );
        assert_eq!(chunk.kind(), "token");
    }

    #[test]
    fn singular_citation_precedes_plural_list() {
        let chunk = parse_chunk(
            r#"{"type":"citation","message_id":"m1",
                "citation":{"id":"a","file_path":"src/lib.rs","start_line":3,"end_line":9},
                "citations":[{"id":"b","score":0.5},{"id":"a"}]}"#,
        )
        .expect("citation chunk should parse");

        let ChunkPayload::Citation { citations } = chunk.payload else {
            panic!("expected citation payload");
        };
        let ids = citations.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "a"]);
        assert_eq!(citations[0].location(), "src/lib.rs:3-9");
        assert_eq!(citations[1].score, Some(0.5));
    }

    #[test]
    fn control_statuses_map_to_variants() {
        let status = |raw: &str| {
            let chunk = parse_chunk(raw).expect("control chunk should parse");
            match chunk.payload {
                ChunkPayload::Control { status } => status,
                other => panic!("unexpected payload {other:?}"),
            }
        };

        assert_eq!(
            status(r#"{"type":"control","message_id":"m","status":"in_progress"}"#),
            ControlStatus::InProgress
        );
        assert_eq!(
            status(r#"{"type":"control","message_id":"m","status":"completed"}"#),
            ControlStatus::Completed
        );
        assert_eq!(
            status(r#"{"type":"control","message_id":"m","status":"aborted"}"#),
            ControlStatus::Aborted
        );
        assert_eq!(
            status(r#"{"type":"control","message_id":"m","status":"paused"}"#),
            ControlStatus::Other("paused".to_string())
        );
        assert_eq!(
            status(r#"{"type":"control","message_id":"m"}"#),
            ControlStatus::Other(String::new())
        );
    }

    #[test]
    fn error_chunk_without_body_gets_fallback_fault() {
        let chunk = parse_chunk(r#"{"type":"error","message_id":"m"}"#).expect("should parse");
        assert_eq!(
            chunk.payload,
            ChunkPayload::Error {
                fault: StreamFault::default()
            }
        );

        let chunk = parse_chunk(
            r#"{"type":"error","message_id":"m","error":{"code":"RATE","message":"slow down","retryable":true}}"#,
        )
        .expect("should parse");
        let ChunkPayload::Error { fault } = chunk.payload else {
            panic!("expected error payload");
        };
        assert_eq!(fault.code, "RATE");
        assert_eq!(fault.message, "slow down");
        assert_eq!(fault.retryable, Some(true));
    }

    #[test]
    fn unknown_types_are_forwarded() {
        let chunk = parse_chunk(r#"{"type":"heartbeat","message_id":"m","extra":1}"#)
            .expect("unknown type should still parse");
        assert_eq!(
            chunk.payload,
            ChunkPayload::Unknown {
                kind: "heartbeat".to_string()
            }
        );
    }

    #[test]
    fn usage_is_carried_on_any_chunk() {
        let chunk = parse_chunk(
            r#"{"type":"control","message_id":"m","status":"completed","usage":{"prompt_tokens":12,"total_tokens":40}}"#,
        )
        .expect("should parse");
        assert_eq!(
            chunk.usage,
            Some(TokenUsage {
                prompt_tokens: Some(12),
                completion_tokens: None,
                total_tokens: Some(40),
            })
        );
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        assert!(parse_chunk("{\"type\":\"token\"").is_none());
        assert!(parse_chunk("[DONE]").is_none());
        assert!(parse_chunk(r#"{"type":"token","delta":"x"}"#).is_none());
        assert!(parse_chunk(r#"{"message_id":"m","delta":"x"}"#).is_none());
    }
}
