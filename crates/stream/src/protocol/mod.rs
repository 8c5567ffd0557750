/// Typed stream chunks and payload parsing.
pub mod chunk;
/// Incremental frame splitting for both wire framings.
pub mod decoder;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use chunk::{
    ChunkPayload, Citation, ControlStatus, StreamChunk, StreamFault, TokenUsage, parse_chunk,
};
pub use decoder::FrameDecoder;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Framing preference requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Ask for event-stream and follow whatever the response declares.
    #[default]
    Auto,
    Sse,
    Ndjson,
}

/// Framing actually used to decode a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    EventStream,
    LineDelimited,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Sse => "sse",
            Self::Ndjson => "ndjson",
        }
    }

    /// Value for the outbound `Accept` header.
    pub fn accept_header(&self) -> &'static str {
        match self {
            Self::Auto | Self::Sse => EVENT_STREAM_CONTENT_TYPE,
            Self::Ndjson => NDJSON_CONTENT_TYPE,
        }
    }

    /// Resolves the framing for a response with the given declared content type.
    ///
    /// Only `Auto` consults the response; explicit protocols are trusted as requested.
    pub fn resolve(&self, content_type: Option<&str>) -> Framing {
        match self {
            Self::Sse => Framing::EventStream,
            Self::Ndjson => Framing::LineDelimited,
            Self::Auto => match content_type {
                Some(value) if value.to_ascii_lowercase().contains(NDJSON_CONTENT_TYPE) => {
                    Framing::LineDelimited
                }
                _ => Framing::EventStream,
            },
        }
    }
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for StreamProtocol {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "sse" | "event-stream" => Ok(Self::Sse),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(format!("unknown stream protocol '{other}'")),
        }
    }
}
