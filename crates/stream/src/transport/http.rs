use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use snafu::{ResultExt, ensure};

use super::{BoxFuture, ByteSource, ChatTransport, ReadOutcome, TransportResponse};
use crate::cancel::CancelToken;
use crate::error::{
    BuildHttpClientSnafu, ClientResult, MissingEndpointSnafu, ReadBodySnafu, SendRequestSnafu,
};
use crate::request::ChatRequest;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Posts chat requests to the answer service (or its proxy) over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context(BuildHttpClientSnafu {
                stage: "build-http-client",
            })?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

impl ChatTransport for HttpTransport {
    fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(self.endpoint.as_str())
        }
    }

    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        accept: &'static str,
    ) -> BoxFuture<'a, ClientResult<TransportResponse>> {
        Box::pin(async move {
            ensure!(
                !self.endpoint.is_empty(),
                MissingEndpointSnafu {
                    stage: "open-http-stream",
                }
            );

            let response = self
                .client
                .post(&self.endpoint)
                .header(ACCEPT, accept)
                .json(request)
                .send()
                .await
                .context(SendRequestSnafu {
                    stage: "send-chat-request",
                })?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            tracing::debug!(
                endpoint = %self.endpoint,
                status,
                content_type = content_type.as_deref().unwrap_or("<none>"),
                "chat response headers received"
            );

            let body: BodyStream = Box::pin(response.bytes_stream());
            Ok(TransportResponse {
                status,
                content_type,
                body: Box::new(HttpByteSource { body }),
            })
        })
    }
}

struct HttpByteSource {
    body: BodyStream,
}

impl ByteSource for HttpByteSource {
    fn read<'a>(&'a mut self, cancel: &'a CancelToken) -> BoxFuture<'a, ClientResult<ReadOutcome>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(ReadOutcome::Cancelled),
                next = self.body.next() => match next {
                    Some(chunk) => chunk.map(ReadOutcome::Data).context(ReadBodySnafu {
                        stage: "read-response-chunk",
                    }),
                    None => Ok(ReadOutcome::End),
                },
            }
        })
    }
}
