//! Header filtering for both legs of the relay.
//!
//! Neither leg is ever persistent, so `Connection: close` is always
//! authoritative and the peer's own `Connection` header is dropped.
//! Kept entries retain their wire order, and values are carried as raw
//! bytes so nothing is re-encoded on the way through.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;

/// Inbound headers never forwarded upstream.
const REQUEST_EXCLUDED: &[&str] = &["host", "connection"];

/// Upstream headers never relayed to the client.
const RESPONSE_EXCLUDED: &[&str] = &["connection", "server", "status"];

/// A single header line. Keys compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub key: String,
    pub value: Bytes,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.into(),
            value: Bytes::copy_from_slice(value.as_ref()),
        }
    }

    pub fn connection_close() -> Self {
        Self::new("Connection", "close")
    }

    /// Case-insensitive key match.
    pub fn is(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name)
    }

    /// The value as text, when it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Whether the entry can be written as a header line. Rejects names that
    /// are not tokens and values holding control bytes such as CR or LF.
    pub fn is_valid(&self) -> bool {
        HeaderName::from_bytes(self.key.as_bytes()).is_ok()
            && HeaderValue::from_bytes(&self.value).is_ok()
    }

    fn is_any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.is(name))
    }
}

/// Wire-order headers of a message, carried in its extensions next to the
/// [`HeaderMap`], which groups repeated keys together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHeaders(pub Vec<HeaderEntry>);

/// Headers to send upstream: everything but `Host` and `Connection`, then a
/// single `Connection: close`.
pub fn filter_request_headers(headers: &[HeaderEntry]) -> Vec<HeaderEntry> {
    let mut kept: Vec<HeaderEntry> = headers
        .iter()
        .filter(|h| !h.is_any(REQUEST_EXCLUDED))
        .cloned()
        .collect();
    kept.push(HeaderEntry::connection_close());
    kept
}

/// Upstream headers safe to relay: everything but `Connection`, `Server`
/// and `Status`. The relay appends its own `Connection: close`.
pub fn filter_response_headers(headers: &[HeaderEntry]) -> Vec<HeaderEntry> {
    headers
        .iter()
        .filter(|h| !h.is_any(RESPONSE_EXCLUDED))
        .cloned()
        .collect()
}

/// Entries straight from a parsed message head, in wire order.
pub fn entries_from_parsed(headers: &[httparse::Header<'_>]) -> Vec<HeaderEntry> {
    headers
        .iter()
        .map(|h| HeaderEntry::new(h.name, h.value))
        .collect()
}

/// Flatten a header map into entries. Repeated keys come out grouped.
pub fn entries_from_map(map: &HeaderMap) -> Vec<HeaderEntry> {
    map.iter()
        .map(|(name, value)| HeaderEntry::new(name.as_str(), value.as_bytes()))
        .collect()
}

/// `ordered`, followed by every entry of `map` whose key `ordered` never
/// mentions. Picks up headers that middleware added to the map.
pub fn merge_with_map(ordered: &[HeaderEntry], map: &HeaderMap) -> Vec<HeaderEntry> {
    let mut merged = ordered.to_vec();
    for (name, value) in map {
        if !ordered.iter().any(|h| h.is(name.as_str())) {
            merged.push(HeaderEntry::new(name.as_str(), value.as_bytes()));
        }
    }
    merged
}

/// Append `entries` to `map`, keeping repeated keys. Entries that are not
/// valid HTTP header tokens are skipped.
pub fn append_to_map(map: &mut HeaderMap, entries: &[HeaderEntry]) {
    for entry in entries {
        let name = match HeaderName::from_bytes(entry.key.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                tracing::debug!(key = %entry.key, "Dropping header with invalid name");
                continue;
            }
        };
        let value = match HeaderValue::from_bytes(&entry.value) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!(key = %entry.key, "Dropping header with invalid value");
                continue;
            }
        };
        map.append(name, value);
    }
}

/// Re-frame a buffered body of `len` bytes: `Transfer-Encoding` goes, the
/// first `Content-Length` is rewritten in place and later ones are dropped.
/// Without one, `Content-Length` is appended when `len > 0` or `always`.
pub fn frame_headers(headers: &[HeaderEntry], len: usize, always: bool) -> Vec<HeaderEntry> {
    let mut framed = Vec::with_capacity(headers.len() + 1);
    let mut has_length = false;
    for entry in headers {
        if entry.is("transfer-encoding") {
            continue;
        }
        if entry.is("content-length") {
            if !has_length {
                framed.push(HeaderEntry::new(entry.key.clone(), len.to_string()));
                has_length = true;
            }
            continue;
        }
        framed.push(entry.clone());
    }
    if !has_length && (len > 0 || always) {
        framed.push(HeaderEntry::new("Content-Length", len.to_string()));
    }
    framed
}
