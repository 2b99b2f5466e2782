//! Inbound request handling.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Adapt the server's request into the gateway's [`InboundRequest`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The ID travels upstream as an ordinary header

use axum::http::{request::Parts, HeaderValue, Method, Request};
use bytes::Bytes;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::headers::{entries_from_map, merge_with_map, HeaderEntry, OrderedHeaders};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Issues a fresh UUID v4 for requests that arrive without an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// One client request, fully buffered.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path plus query string as received. May be empty.
    pub full_path: String,
    pub headers: Vec<HeaderEntry>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, full_path: impl Into<String>, headers: Vec<HeaderEntry>) -> Self {
        Self {
            method,
            full_path: full_path.into(),
            headers,
            body: Bytes::new(),
        }
    }

    /// Headers come from the wire-order copy in the extensions when the
    /// connection layer left one, plus anything middleware added since.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let full_path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_default();
        let headers = match parts.extensions.get::<OrderedHeaders>() {
            Some(OrderedHeaders(ordered)) => merge_with_map(ordered, &parts.headers),
            None => entries_from_map(&parts.headers),
        };
        Self {
            method: parts.method.clone(),
            full_path: full_path.to_string(),
            headers,
            body,
        }
    }

    /// Path forwarded upstream; `/` when the request carried none.
    pub fn target_path(&self) -> &str {
        if self.full_path.is_empty() {
            "/"
        } else {
            &self.full_path
        }
    }

    pub fn request_id(&self) -> &str {
        self.headers
            .iter()
            .find(|h| h.is(X_REQUEST_ID))
            .and_then(HeaderEntry::value_str)
            .unwrap_or("unknown")
    }
}
