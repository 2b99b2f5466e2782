//! HTTP/1.x exchange with the upstream.
//!
//! # Responsibilities
//! - Connect through the [`TimedConnector`]
//! - Send one request and buffer the whole response
//! - Keep header order and raw header bytes on both legs
//! - Tell "never reached the upstream" apart from "reached it but got no
//!   usable response"
//!
//! # Design Decisions
//! - One connection per request, dropped after the exchange
//! - Connect failures are errors; anything after connect yields a result
//!   with status 0

use std::future::Future;

use axum::http::{Method, Version};
use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::http::headers::{frame_headers, HeaderEntry};
use crate::http::wire::{encode_request_head, BodyFraming, WireError, WireStream};
use crate::net::{ConnectError, Source, TimedConnector};

/// Everything needed to issue one upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub source: Source,
    pub use_http11: bool,
    pub host_header: String,
    pub port: u16,
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
    pub headers: Vec<HeaderEntry>,
}

/// Buffered upstream response. A `status_code` of 0 means the upstream was
/// reached but no response could be obtained. Headers are in wire order
/// with their bytes untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamResult {
    pub status_code: u16,
    pub headers: Vec<HeaderEntry>,
    pub body: Bytes,
}

impl UpstreamResult {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn has_status(&self) -> bool {
        self.status_code != 0
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// The upstream could not be reached at all.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream address is unresolved")]
    Unresolved,

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl UpstreamError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Connect(e) => e.reason(),
        }
    }
}

/// Performs a single request against the upstream.
pub trait UpstreamClient: Send + Sync + 'static {
    fn request(
        &self,
        request: UpstreamRequest,
    ) -> impl Future<Output = Result<UpstreamResult, UpstreamError>> + Send;
}

/// [`UpstreamClient`] writing HTTP/1.x straight onto the connection.
#[derive(Debug, Clone, Copy)]
pub struct Http1UpstreamClient {
    connector: TimedConnector,
}

impl Http1UpstreamClient {
    pub fn new(connector: TimedConnector) -> Self {
        Self { connector }
    }
}

impl UpstreamClient for Http1UpstreamClient {
    async fn request(&self, request: UpstreamRequest) -> Result<UpstreamResult, UpstreamError> {
        let addr = request
            .source
            .socket_addr(request.port)
            .ok_or(UpstreamError::Unresolved)?;
        let stream = self.connector.connect(addr).await?;

        match exchange(stream, &request).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(upstream = %addr, error = %e, "Upstream exchange failed");
                Ok(UpstreamResult::failed())
            }
        }
    }
}

async fn exchange(stream: TcpStream, request: &UpstreamRequest) -> Result<UpstreamResult, WireError> {
    let body = request.body.as_deref().unwrap_or_default();
    let mut wire = WireStream::new(stream);
    wire.write_message(&encode_request(request), body).await?;

    let head = wire.read_response_head().await?;
    let framing = BodyFraming::for_response(&request.method, head.status, &head.headers)?;
    let body = wire.read_body(framing, usize::MAX).await?;
    if let Err(e) = wire.close().await {
        tracing::debug!(error = %e, "Upstream connection closed with error");
    }

    Ok(UpstreamResult {
        status_code: head.status,
        headers: head.headers,
        body,
    })
}

/// Request line, `Host`, then the filtered headers in their given order.
fn encode_request(request: &UpstreamRequest) -> Vec<u8> {
    let mut headers = Vec::with_capacity(request.headers.len() + 2);
    headers.push(HeaderEntry::new("Host", &request.host_header));
    headers.extend(request.headers.iter().cloned());
    let body_len = request.body.as_ref().map_or(0, Bytes::len);

    let version = if request.use_http11 {
        Version::HTTP_11
    } else {
        Version::HTTP_10
    };
    encode_request_head(
        &request.method,
        &request.path,
        version,
        &frame_headers(&headers, body_len, false),
    )
}
