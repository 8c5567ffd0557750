mod http;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use super::cancel::CancelToken;
use super::error::ClientResult;
use super::request::ChatRequest;

pub use http::HttpTransport;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one read from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Bytes),
    End,
    Cancelled,
}

/// Incremental response body. Every read is raced against the cancellation token.
pub trait ByteSource: Send {
    fn read<'a>(&'a mut self, cancel: &'a CancelToken) -> BoxFuture<'a, ClientResult<ReadOutcome>>;
}

pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Box<dyn ByteSource>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads the rest of the body, keeping at most `limit` bytes.
    ///
    /// Returns `None` when cancelled before the body ended.
    pub async fn read_to_end(
        &mut self,
        cancel: &CancelToken,
        limit: usize,
    ) -> ClientResult<Option<Vec<u8>>> {
        let mut collected = Vec::new();
        loop {
            match self.body.read(cancel).await? {
                ReadOutcome::Data(bytes) => {
                    let room = limit.saturating_sub(collected.len());
                    collected.extend_from_slice(&bytes[..bytes.len().min(room)]);
                }
                ReadOutcome::End => return Ok(Some(collected)),
                ReadOutcome::Cancelled => return Ok(None),
            }
        }
    }
}

/// Seam between a stream session and whatever carries its request.
pub trait ChatTransport: Send + Sync {
    /// Where requests go, for diagnostics. `None` when nothing is configured.
    fn endpoint(&self) -> Option<&str>;

    fn is_configured(&self) -> bool {
        self.endpoint().is_some()
    }

    /// Issues the request and returns once response headers are available.
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        accept: &'static str,
    ) -> BoxFuture<'a, ClientResult<TransportResponse>>;
}
