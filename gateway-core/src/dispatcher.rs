//! Component F: the actual upstream HTTP round-trip. No retry logic lives
//! here — that is the orchestrator's job.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use std::pin::Pin;

use crate::error::{GatewayError, Result};

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

enum ResponseBodyState {
    Unread(BodyStream),
    Buffered(Bytes),
}

/// The raw upstream response. The body starts out unread; callers decide
/// whether reading it is permitted (per the streaming gate and the
/// classifier's status-code gating) before calling [`DispatchResponse::read_body`].
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ResponseBodyState,
}

impl DispatchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, stream: BodyStream) -> Self {
        Self {
            status,
            headers,
            body: ResponseBodyState::Unread(stream),
        }
    }

    pub fn buffered(status: StatusCode, headers: HeaderMap, bytes: Bytes) -> Self {
        Self {
            status,
            headers,
            body: ResponseBodyState::Buffered(bytes),
        }
    }

    /// Reads the full body into memory, caching it so a second call (or a
    /// later [`DispatchResponse::into_outgoing`]) doesn't re-read the
    /// network. This is the only sanctioned way to inspect the body of a
    /// non-2xx response for classification; callers must gate it on status
    /// code themselves — this method has no opinion on when it's safe.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        if let ResponseBodyState::Buffered(bytes) = &self.body {
            return Ok(bytes.clone());
        }
        let ResponseBodyState::Unread(mut stream) =
            std::mem::replace(&mut self.body, ResponseBodyState::Buffered(Bytes::new()))
        else {
            unreachable!("checked above");
        };
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let bytes = Bytes::from(buf);
        self.body = ResponseBodyState::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Consumes the response into whatever body representation survives:
    /// the still-live stream if nothing was ever read, or the cached bytes
    /// otherwise. Never touches the network itself.
    pub fn into_outgoing(self) -> OutgoingBody {
        match self.body {
            ResponseBodyState::Unread(stream) => OutgoingBody::Stream(stream),
            ResponseBodyState::Buffered(bytes) => OutgoingBody::Bytes(bytes),
        }
    }
}

pub enum OutgoingBody {
    Bytes(Bytes),
    Stream(BodyStream),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<DispatchResponse>;
}

/// Production dispatcher backed by `reqwest`.
pub struct ReqwestDispatcher {
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatcher for ReqwestDispatcher {
    async fn send(
        &self,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<DispatchResponse> {
        // content-length must be absent at dispatch; let the transport
        // recompute framing from the body it's handed.
        headers.remove(http::header::CONTENT_LENGTH);

        let mut request = self.client.request(method, url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from));

        Ok(DispatchResponse::new(status, headers, Box::pin(stream)))
    }
}
