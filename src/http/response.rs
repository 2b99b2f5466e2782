//! Response handed back to the client.
//!
//! # Responsibilities
//! - Carry the relayed upstream status, headers and body
//! - Build the plain-text error page for gateway failures
//!
//! # Design Decisions
//! - Bodies are written in a single buffered write
//! - Status, then headers, then body, in that order

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::http::headers::{append_to_map, filter_response_headers, HeaderEntry, OrderedHeaders};

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: Vec<HeaderEntry>,
    pub body: Bytes,
}

impl GatewayResponse {
    /// Relay an upstream response, replacing its framing headers.
    pub fn relay(status: StatusCode, upstream_headers: &[HeaderEntry], body: Bytes) -> Self {
        let mut headers = filter_response_headers(upstream_headers);
        headers.push(HeaderEntry::connection_close());
        Self {
            status,
            headers,
            body,
        }
    }

    /// Plain-text page naming `status`.
    pub fn error(status: StatusCode) -> Self {
        Self {
            status,
            headers: vec![HeaderEntry::new("Content-Type", "text/plain")],
            body: Bytes::from(status.to_string()),
        }
    }

    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .and_then(HeaderEntry::value_str)
    }
}

/// The header map is for middleware; the connection layer writes the
/// [`OrderedHeaders`] copy, which keeps wire order and raw bytes.
impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        append_to_map(&mut headers, &self.headers);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response.extensions_mut().insert(OrderedHeaders(self.headers));
        response
    }
}
