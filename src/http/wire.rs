//! HTTP/1.x message framing over raw streams.
//!
//! # Responsibilities
//! - Read request and response heads, keeping header order and bytes
//! - Read bodies framed by `Content-Length`, chunked coding or close
//! - Encode heads from ordered [`HeaderEntry`] lists
//!
//! # Design Decisions
//! - Every connection carries exactly one exchange, so there is no
//!   pipelining state to track
//! - Heads are capped at [`MAX_HEAD_SIZE`] bytes and [`MAX_HEADERS`] lines

use std::io;
use std::time::Duration;

use axum::http::{Method, StatusCode, Version};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::headers::{entries_from_parsed, HeaderEntry};

pub const MAX_HEAD_SIZE: usize = 64 * 1024;
pub const MAX_HEADERS: usize = 100;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed mid-message")]
    Closed,

    #[error("message head exceeds {MAX_HEAD_SIZE} bytes")]
    HeadTooLarge,

    #[error("malformed message head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("incomplete message head")]
    Incomplete,

    #[error("unsupported method")]
    Method,

    #[error("invalid content-length")]
    ContentLength,

    #[error("malformed chunked body")]
    Chunked,

    #[error("body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl WireError {
    /// Status owed to a client whose request could not be read, or `None`
    /// when the client is gone.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Io(_) | Self::Closed => None,
            Self::HeadTooLarge => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::BodyTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as sent.
    pub target: String,
    pub version: Version,
    pub headers: Vec<HeaderEntry>,
}

impl RequestHead {
    pub fn expects_continue(&self) -> bool {
        self.headers
            .iter()
            .any(|h| h.is("expect") && h.value.eq_ignore_ascii_case(b"100-continue"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<HeaderEntry>,
}

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    pub fn for_request(headers: &[HeaderEntry]) -> Result<Self, WireError> {
        if is_chunked(headers) {
            return Ok(Self::Chunked);
        }
        Ok(content_length(headers)?.map_or(Self::Empty, Self::Length))
    }

    pub fn for_response(
        method: &Method,
        status: u16,
        headers: &[HeaderEntry],
    ) -> Result<Self, WireError> {
        if method == Method::HEAD || (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Self::Empty);
        }
        if is_chunked(headers) {
            return Ok(Self::Chunked);
        }
        Ok(content_length(headers)?.map_or(Self::UntilClose, Self::Length))
    }
}

fn is_chunked(headers: &[HeaderEntry]) -> bool {
    headers
        .iter()
        .filter(|h| h.is("transfer-encoding"))
        .last()
        .and_then(|h| h.value.split(|b| *b == b',').last())
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

fn content_length(headers: &[HeaderEntry]) -> Result<Option<usize>, WireError> {
    let Some(entry) = headers.iter().find(|h| h.is("content-length")) else {
        return Ok(None);
    };
    entry
        .value_str()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or(WireError::ContentLength)
}

/// A byte stream with a read buffer, speaking one HTTP/1.x exchange.
#[derive(Debug)]
pub struct WireStream<S> {
    io: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WireStream<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub async fn read_request_head(&mut self) -> Result<RequestHead, WireError> {
        let head = self.read_until_blank_line().await?;
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        if parsed.parse(&head)?.is_partial() {
            return Err(WireError::Incomplete);
        }

        let method = parsed.method.ok_or(WireError::Incomplete)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| WireError::Method)?;
        let target = parsed.path.ok_or(WireError::Incomplete)?.to_string();
        let version = version_from_minor(parsed.version);
        Ok(RequestHead {
            method,
            target,
            version,
            headers: entries_from_parsed(parsed.headers),
        })
    }

    /// Read the final response head, skipping interim 1xx responses.
    pub async fn read_response_head(&mut self) -> Result<ResponseHead, WireError> {
        loop {
            let head = self.read_until_blank_line().await?;
            let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Response::new(&mut slots);
            if parsed.parse(&head)?.is_partial() {
                return Err(WireError::Incomplete);
            }

            let status = parsed.code.ok_or(WireError::Incomplete)?;
            if (100..200).contains(&status) && status != 101 {
                tracing::trace!(status, "Skipping interim response");
                continue;
            }
            return Ok(ResponseHead {
                status,
                headers: entries_from_parsed(parsed.headers),
            });
        }
    }

    /// Read a whole body, refusing more than `limit` bytes.
    pub async fn read_body(&mut self, framing: BodyFraming, limit: usize) -> Result<Bytes, WireError> {
        match framing {
            BodyFraming::Empty => Ok(Bytes::new()),
            BodyFraming::Length(len) if len > limit => Err(WireError::BodyTooLarge { limit }),
            BodyFraming::Length(len) => self.read_exact_bytes(len).await,
            BodyFraming::Chunked => self.read_chunked(limit).await,
            BodyFraming::UntilClose => self.read_until_close(limit).await,
        }
    }

    pub async fn write_message(&mut self, head: &[u8], body: &[u8]) -> io::Result<()> {
        self.io.write_all(head).await?;
        if !body.is_empty() {
            self.io.write_all(body).await?;
        }
        self.io.flush().await
    }

    /// Send FIN and drop the stream.
    pub async fn close(mut self) -> io::Result<()> {
        self.io.shutdown().await
    }

    /// Send FIN, then discard whatever the peer still sends for up to
    /// `linger`. Unread input at close time makes the kernel send RST.
    pub async fn close_lingering(mut self, linger: Duration) -> io::Result<()> {
        self.io.shutdown().await?;
        let drain = async {
            let mut scratch = [0u8; READ_CHUNK];
            while self.io.read(&mut scratch).await? > 0 {}
            Ok::<_, io::Error>(())
        };
        let _ = tokio::time::timeout(linger, drain).await;
        Ok(())
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        self.io.read_buf(&mut self.buf).await
    }

    /// Everything up to and including the next empty line.
    async fn read_until_blank_line(&mut self) -> Result<Bytes, WireError> {
        let mut searched = 0;
        loop {
            if let Some(end) = find(&self.buf[searched..], b"\r\n\r\n") {
                return Ok(self.buf.split_to(searched + end + 4).freeze());
            }
            searched = self.buf.len().saturating_sub(3);
            if self.buf.len() >= MAX_HEAD_SIZE {
                return Err(WireError::HeadTooLarge);
            }
            if self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
        }
    }

    /// One CRLF-terminated line, without the terminator.
    async fn read_line(&mut self) -> Result<Bytes, WireError> {
        let mut searched = 0;
        loop {
            if let Some(end) = find(&self.buf[searched..], b"\r\n") {
                let mut line = self.buf.split_to(searched + end + 2);
                line.truncate(line.len() - 2);
                return Ok(line.freeze());
            }
            searched = self.buf.len().saturating_sub(1);
            if self.buf.len() >= MAX_HEAD_SIZE {
                return Err(WireError::HeadTooLarge);
            }
            if self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
        }
    }

    async fn read_exact_bytes(&mut self, len: usize) -> Result<Bytes, WireError> {
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_chunked(&mut self, limit: usize) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        loop {
            let size = parse_chunk_size(&self.read_line().await?)?;
            if size == 0 {
                break;
            }
            if size > limit - body.len() {
                return Err(WireError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&self.read_exact_bytes(size).await?);
            if !self.read_line().await?.is_empty() {
                return Err(WireError::Chunked);
            }
        }
        // trailers
        while !self.read_line().await?.is_empty() {}
        Ok(body.freeze())
    }

    async fn read_until_close(&mut self, limit: usize) -> Result<Bytes, WireError> {
        loop {
            if self.buf.len() > limit {
                return Err(WireError::BodyTooLarge { limit });
            }
            if self.fill().await? == 0 {
                return Ok(self.buf.split().freeze());
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, WireError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    std::str::from_utf8(size)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or(WireError::Chunked)
}

fn version_from_minor(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

fn encode_headers(dst: &mut Vec<u8>, headers: &[HeaderEntry]) {
    for entry in headers {
        if !entry.is_valid() {
            tracing::debug!(key = %entry.key, "Dropping header that cannot be written");
            continue;
        }
        dst.extend_from_slice(entry.key.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(&entry.value);
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
}

pub fn encode_request_head(
    method: &Method,
    target: &str,
    version: Version,
    headers: &[HeaderEntry],
) -> Vec<u8> {
    let mut dst = Vec::with_capacity(256);
    dst.extend_from_slice(method.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(target.as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(version_str(version).as_bytes());
    dst.extend_from_slice(b"\r\n");
    encode_headers(&mut dst, headers);
    dst
}

pub fn encode_response_head(version: Version, status: StatusCode, headers: &[HeaderEntry]) -> Vec<u8> {
    let mut dst = Vec::with_capacity(256);
    dst.extend_from_slice(version_str(version).as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(status.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    dst.extend_from_slice(b"\r\n");
    encode_headers(&mut dst, headers);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// A wire stream whose peer has already written `data` and hung up.
    async fn preloaded(data: &[u8]) -> WireStream<DuplexStream> {
        let (ours, mut theirs) = duplex(data.len().max(1) + READ_CHUNK);
        theirs.write_all(data).await.unwrap();
        drop(theirs);
        WireStream::new(ours)
    }

    fn keys(headers: &[HeaderEntry]) -> Vec<&str> {
        headers.iter().map(|h| h.key.as_str()).collect()
    }

    #[tokio::test]
    async fn request_head_keeps_order_and_bytes() {
        let mut wire = preloaded(
            b"POST /items?x=1 HTTP/1.1\r\nHost: example.test\r\nX-A: 1\r\nX-B: 2\r\nX-A: 3\r\nX-Name: caf\xe9\r\nContent-Length: 4\r\n\r\nbody",
        )
        .await;

        let head = wire.read_request_head().await.unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.target, "/items?x=1");
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(keys(&head.headers), ["Host", "X-A", "X-B", "X-A", "X-Name", "Content-Length"]);
        assert_eq!(&head.headers[4].value[..], b"caf\xe9");

        let framing = BodyFraming::for_request(&head.headers).unwrap();
        assert_eq!(framing, BodyFraming::Length(4));
        assert_eq!(&wire.read_body(framing, 16).await.unwrap()[..], b"body");
    }

    #[tokio::test]
    async fn oversized_length_is_refused_before_reading() {
        let mut wire = preloaded(b"PUT / HTTP/1.0\r\nContent-Length: 64\r\n\r\n").await;
        let head = wire.read_request_head().await.unwrap();
        assert_eq!(head.version, Version::HTTP_10);

        let framing = BodyFraming::for_request(&head.headers).unwrap();
        let err = wire.read_body(framing, 16).await.unwrap_err();
        assert!(matches!(err, WireError::BodyTooLarge { limit: 16 }));
        assert_eq!(err.status(), Some(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[tokio::test]
    async fn chunked_body_is_decoded() {
        let mut wire = preloaded(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n",
        )
        .await;
        let head = wire.read_response_head().await.unwrap();
        let framing = BodyFraming::for_response(&Method::GET, head.status, &head.headers).unwrap();
        assert_eq!(framing, BodyFraming::Chunked);
        assert_eq!(&wire.read_body(framing, usize::MAX).await.unwrap()[..], b"Wikipedia");
    }

    #[tokio::test]
    async fn chunked_body_respects_limit() {
        let mut wire = preloaded(b"a\r\n0123456789\r\n0\r\n\r\n").await;
        let err = wire.read_body(BodyFraming::Chunked, 4).await.unwrap_err();
        assert!(matches!(err, WireError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn bad_chunk_size_is_malformed() {
        let mut wire = preloaded(b"zz\r\nxx\r\n0\r\n\r\n").await;
        let err = wire.read_body(BodyFraming::Chunked, 64).await.unwrap_err();
        assert!(matches!(err, WireError::Chunked));
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let mut wire = preloaded(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nX-A: 1\r\nX-B: 2\r\nX-A: 3\r\n\r\ncreated",
        )
        .await;
        let head = wire.read_response_head().await.unwrap();
        assert_eq!(head.status, 201);
        assert_eq!(keys(&head.headers), ["X-A", "X-B", "X-A"]);

        let framing = BodyFraming::for_response(&Method::GET, head.status, &head.headers).unwrap();
        assert_eq!(framing, BodyFraming::UntilClose);
        assert_eq!(&wire.read_body(framing, usize::MAX).await.unwrap()[..], b"created");
    }

    #[test]
    fn head_and_no_content_have_no_body() {
        let headers = vec![HeaderEntry::new("Content-Length", "10")];
        assert_eq!(
            BodyFraming::for_response(&Method::HEAD, 200, &headers).unwrap(),
            BodyFraming::Empty
        );
        assert_eq!(
            BodyFraming::for_response(&Method::GET, 204, &[]).unwrap(),
            BodyFraming::Empty
        );
        assert!(matches!(
            BodyFraming::for_request(&[HeaderEntry::new("Content-Length", "ten")]),
            Err(WireError::ContentLength)
        ));
    }

    #[tokio::test]
    async fn truncated_messages_are_errors() {
        let mut wire = preloaded(b"HTTP/1.1 200 OK\r\nContent-Le").await;
        assert!(matches!(wire.read_response_head().await, Err(WireError::Closed)));

        let mut wire = preloaded(b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nshort").await;
        let head = wire.read_response_head().await.unwrap();
        let framing = BodyFraming::for_response(&Method::GET, head.status, &head.headers).unwrap();
        assert!(matches!(wire.read_body(framing, usize::MAX).await, Err(WireError::Closed)));

        let mut wire = preloaded(b"SPDY/9 banana\r\n\r\n").await;
        assert!(matches!(wire.read_response_head().await, Err(WireError::Parse(_))));
    }

    #[test]
    fn expect_continue_is_detected() {
        let head = RequestHead {
            method: Method::POST,
            target: "/".into(),
            version: Version::HTTP_11,
            headers: vec![HeaderEntry::new("Expect", "100-Continue")],
        };
        assert!(head.expects_continue());
    }

    #[test]
    fn heads_are_encoded_in_entry_order() {
        let headers = vec![
            HeaderEntry::new("X-A", "1"),
            HeaderEntry::new("X-B", "2"),
            HeaderEntry::new("X-Bad", "a\r\nInjected: 1"),
            HeaderEntry::new("X-A", b"caf\xe9"),
        ];

        let request = encode_request_head(&Method::GET, "/", Version::HTTP_10, &headers);
        assert_eq!(request, b"GET / HTTP/1.0\r\nX-A: 1\r\nX-B: 2\r\nX-A: caf\xe9\r\n\r\n");

        let response = encode_response_head(Version::HTTP_11, StatusCode::BAD_GATEWAY, &headers[..1]);
        assert_eq!(response, b"HTTP/1.1 502 Bad Gateway\r\nX-A: 1\r\n\r\n");
    }
}
