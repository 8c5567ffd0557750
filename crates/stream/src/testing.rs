//! In-memory transport for driving sessions from tests.
//!
//! Each scripted response owns an mpsc-backed body, so a test decides exactly
//! which bytes arrive, in what pieces, and when the body ends or breaks.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use snafu::OptionExt;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::{ClientResult, MissingEndpointSnafu, TransportSnafu};
use crate::request::ChatRequest;
use crate::transport::{BoxFuture, ByteSource, ChatTransport, ReadOutcome, TransportResponse};

pub(crate) const SCRIPTED_ENDPOINT: &str = "scripted://chat";

enum BodyPart {
    Data(Bytes),
    Fail(String),
}

/// Write side of a scripted body. Dropping it ends the body.
pub(crate) struct BodyFeed {
    tx: mpsc::UnboundedSender<BodyPart>,
}

impl BodyFeed {
    /// Returns false once the reader has gone away.
    pub(crate) fn send(&self, text: &str) -> bool {
        self.send_bytes(text.as_bytes())
    }

    pub(crate) fn send_bytes(&self, bytes: &[u8]) -> bool {
        self.tx
            .send(BodyPart::Data(Bytes::copy_from_slice(bytes)))
            .is_ok()
    }

    /// Makes the next read fail with a transport error.
    pub(crate) fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.send(BodyPart::Fail(message.into())).is_ok()
    }
}

pub(crate) struct ScriptedResponse {
    status: u16,
    content_type: Option<String>,
    body: mpsc::UnboundedReceiver<BodyPart>,
}

impl ScriptedResponse {
    /// Response whose body stays open until the returned feed is dropped.
    pub(crate) fn open(status: u16, content_type: Option<&str>) -> (Self, BodyFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let response = Self {
            status,
            content_type: content_type.map(str::to_string),
            body: rx,
        };
        (response, BodyFeed { tx })
    }

    /// Response whose body is exactly `parts`, delivered one read per part.
    pub(crate) fn complete(status: u16, content_type: Option<&str>, parts: &[&str]) -> Self {
        let (response, feed) = Self::open(status, content_type);
        for part in parts {
            feed.send(part);
        }
        response
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub request: ChatRequest,
    pub accept: &'static str,
}

pub(crate) struct ScriptedTransport {
    endpoint: Option<String>,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            endpoint: Some(SCRIPTED_ENDPOINT.to_string()),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unconfigured() -> Self {
        Self {
            endpoint: None,
            ..Self::new()
        }
    }

    pub(crate) fn push(&self, response: ScriptedResponse) {
        self.responses
            .lock()
            .expect("scripted responses lock")
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("recorded requests lock").clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        accept: &'static str,
    ) -> BoxFuture<'a, ClientResult<TransportResponse>> {
        Box::pin(async move {
            self.endpoint.as_ref().context(MissingEndpointSnafu {
                stage: "open-scripted-stream",
            })?;

            self.requests
                .lock()
                .expect("recorded requests lock")
                .push(RecordedRequest {
                    request: request.clone(),
                    accept,
                });

            let scripted = self
                .responses
                .lock()
                .expect("scripted responses lock")
                .pop_front()
                .context(TransportSnafu {
                    stage: "open-scripted-stream",
                    message: "no scripted response left",
                })?;

            Ok(TransportResponse {
                status: scripted.status,
                content_type: scripted.content_type,
                body: Box::new(ScriptedBody {
                    rx: scripted.body,
                }),
            })
        })
    }
}

struct ScriptedBody {
    rx: mpsc::UnboundedReceiver<BodyPart>,
}

impl ByteSource for ScriptedBody {
    fn read<'a>(&'a mut self, cancel: &'a CancelToken) -> BoxFuture<'a, ClientResult<ReadOutcome>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(ReadOutcome::Cancelled),
                part = self.rx.recv() => match part {
                    Some(BodyPart::Data(bytes)) => Ok(ReadOutcome::Data(bytes)),
                    Some(BodyPart::Fail(message)) => TransportSnafu {
                        stage: "read-scripted-body",
                        message,
                    }
                    .fail(),
                    None => Ok(ReadOutcome::End),
                },
            }
        })
    }
}
