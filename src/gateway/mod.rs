//! Per-request orchestration.
//!
//! # States
//! ```text
//! Resolving → Forwarding → Relaying → Done
//!     │            │            │
//!     └────────────┴────────────┴──→ Failed(status)
//! ```
//!
//! # Failure mapping
//! - resolution failure → 502
//! - upstream unreachable (refused, timeout, unreachable) → 502
//! - upstream reached but no usable status → 500
//!
//! Every other status is the upstream's own, passed through verbatim.

pub mod error;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

use crate::config::GatewayConfig;
use crate::http::headers::filter_request_headers;
use crate::http::request::InboundRequest;
use crate::http::response::GatewayResponse;
use crate::http::upstream::{Http1UpstreamClient, UpstreamClient, UpstreamRequest, UpstreamResult};
use crate::net::{DnsResolver, Resolve, TimedConnector};
use crate::observability::metrics;

pub use error::GatewayError;

/// Stage of a request's trip through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Forwarding,
    Relaying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resolving => "resolving",
            Stage::Forwarding => "forwarding",
            Stage::Relaying => "relaying",
        })
    }
}

/// Forwards every request to the configured upstream.
///
/// Holds nothing per request: each call to [`Gateway::handle`] resolves,
/// connects and relays on its own.
pub struct Gateway<R = DnsResolver, C = Http1UpstreamClient> {
    config: Arc<GatewayConfig>,
    resolver: R,
    client: C,
}

impl Gateway {
    /// Gateway with the system resolver and the HTTP/1 upstream client.
    pub fn new(config: GatewayConfig) -> Self {
        let connector = TimedConnector::new(config.connect_timeout);
        Self::with_parts(Arc::new(config), DnsResolver, Http1UpstreamClient::new(connector))
    }
}

impl<R: Resolve, C: UpstreamClient> Gateway<R, C> {
    pub fn with_parts(config: Arc<GatewayConfig>, resolver: R, client: C) -> Self {
        Self {
            config,
            resolver,
            client,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one request to completion. Never fails: every error is turned
    /// into an error page.
    pub async fn handle(&self, request: InboundRequest) -> GatewayResponse {
        let started = Instant::now();
        let request_id = request.request_id().to_string();

        let response = match self.forward(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    path = %request.target_path(),
                    error = %e,
                    status = e.status_code().as_u16(),
                    "Gateway request failed"
                );
                metrics::record_upstream_failure(e.reason());
                GatewayResponse::error(e.status_code())
            }
        };

        metrics::record_request(request.method.as_str(), response.status.as_u16(), started);
        tracing::debug!(
            request_id = %request_id,
            status = response.status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request done"
        );
        response
    }

    async fn forward(&self, request: &InboundRequest) -> Result<GatewayResponse, GatewayError> {
        let request_id = request.request_id();
        let host = &self.config.upstream_host;
        let port = self.config.upstream_port;

        tracing::trace!(
            request_id = %request_id,
            stage = %Stage::Resolving,
            host = %host,
            port,
            "Resolving upstream"
        );
        let source = self.resolver.resolve(host, port).await?;

        tracing::trace!(
            request_id = %request_id,
            stage = %Stage::Forwarding,
            upstream = %source,
            "Forwarding request"
        );
        let upstream_request = UpstreamRequest {
            source,
            use_http11: self.config.use_http11,
            host_header: self.config.host_header(),
            port,
            method: request.method.clone(),
            path: request.target_path().to_string(),
            body: (!request.body.is_empty()).then(|| request.body.clone()),
            headers: filter_request_headers(&request.headers),
        };
        let result = self.client.request(upstream_request).await?;

        tracing::trace!(
            request_id = %request_id,
            stage = %Stage::Relaying,
            status = result.status_code,
            body_len = result.body_len(),
            "Relaying response"
        );
        relay(result)
    }
}

/// Turn an upstream result into the client response, consuming it.
fn relay(result: UpstreamResult) -> Result<GatewayResponse, GatewayError> {
    if !result.has_status() {
        return Err(GatewayError::NoStatus(result.status_code));
    }
    let status = StatusCode::from_u16(result.status_code)
        .map_err(|_| GatewayError::NoStatus(result.status_code))?;
    Ok(GatewayResponse::relay(status, &result.headers, result.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use axum::http::Method;
    use bytes::Bytes;

    use crate::http::headers::HeaderEntry;
    use crate::http::upstream::UpstreamError;
    use crate::net::{ConnectError, ResolveError, Source};

    /// Resolver answering from a fixed table and counting lookups.
    #[derive(Default)]
    struct TableResolver {
        table: HashMap<String, Ipv4Addr>,
        lookups: Mutex<usize>,
    }

    impl TableResolver {
        fn with(host: &str, ip: Ipv4Addr) -> Self {
            let mut table = HashMap::new();
            table.insert(host.to_string(), ip);
            Self {
                table,
                lookups: Mutex::new(0),
            }
        }
    }

    impl Resolve for TableResolver {
        async fn resolve(&self, host: &str, _port: u16) -> Result<Source, ResolveError> {
            *self.lookups.lock().unwrap() += 1;
            self.table
                .get(host)
                .map(|ip| Source::v4(*ip))
                .ok_or_else(|| ResolveError::NoAddress {
                    host: host.to_string(),
                })
        }
    }

    enum Reply {
        Result(UpstreamResult),
        Refused,
    }

    /// Upstream client returning a canned reply and recording requests.
    struct CannedClient {
        reply: Reply,
        seen: Mutex<Vec<UpstreamRequest>>,
    }

    impl CannedClient {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl UpstreamClient for CannedClient {
        async fn request(&self, request: UpstreamRequest) -> Result<UpstreamResult, UpstreamError> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Reply::Result(result) => Ok(result.clone()),
                Reply::Refused => Err(UpstreamError::Connect(ConnectError::Refused(
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                ))),
            }
        }
    }

    fn created() -> UpstreamResult {
        UpstreamResult {
            status_code: 201,
            headers: vec![
                HeaderEntry::new("Content-Type", "text/plain"),
                HeaderEntry::new("Server", "origin/1.0"),
                HeaderEntry::new("Connection", "keep-alive"),
            ],
            body: Bytes::from_static(b"created"),
        }
    }

    fn gateway(reply: Reply) -> Gateway<TableResolver, CannedClient> {
        let mut config = GatewayConfig::for_upstream("example.test");
        config.upstream_port = 8080;
        Gateway::with_parts(
            Arc::new(config),
            TableResolver::with("example.test", Ipv4Addr::new(203, 0, 113, 5)),
            CannedClient::new(reply),
        )
    }

    fn items_request() -> InboundRequest {
        InboundRequest::new(
            Method::GET,
            "/items",
            vec![
                HeaderEntry::new("Host", "example.test"),
                HeaderEntry::new("Accept", "text/plain"),
                HeaderEntry::new("Connection", "keep-alive"),
            ],
        )
    }

    #[tokio::test]
    async fn relays_upstream_response() {
        let gateway = gateway(Reply::Result(created()));
        let response = gateway.handle(items_request()).await;

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(&response.body[..], b"created");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("connection"), Some("close"));
        assert_eq!(response.header("server"), None);
        assert_eq!(response.headers.iter().filter(|h| h.is("connection")).count(), 1);

        let seen = gateway.client.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.source, Source::v4(Ipv4Addr::new(203, 0, 113, 5)));
        assert_eq!(sent.port, 8080);
        assert_eq!(sent.path, "/items");
        assert_eq!(sent.host_header, "example.test:8080");
        assert!(sent.use_http11);
        assert_eq!(sent.body, None);
        assert_eq!(
            sent.headers,
            vec![
                HeaderEntry::new("Accept", "text/plain"),
                HeaderEntry::connection_close(),
            ]
        );
    }

    #[tokio::test]
    async fn empty_path_is_forwarded_as_root() {
        let gateway = gateway(Reply::Result(created()));
        gateway
            .handle(InboundRequest::new(Method::GET, "", Vec::new()))
            .await;

        assert_eq!(gateway.client.seen.lock().unwrap()[0].path, "/");
    }

    #[tokio::test]
    async fn forwards_method_and_body() {
        let gateway = gateway(Reply::Result(created()));
        let mut request = items_request();
        request.method = Method::POST;
        request.body = Bytes::from_static(b"{\"name\":\"x\"}");
        gateway.handle(request).await;

        let seen = gateway.client.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].body.as_deref(), Some(&b"{\"name\":\"x\"}"[..]));
    }

    #[tokio::test]
    async fn resolution_failure_is_bad_gateway() {
        let mut config = GatewayConfig::for_upstream("missing.test");
        config.upstream_port = 8080;
        let gateway = Gateway::with_parts(
            Arc::new(config),
            TableResolver::default(),
            CannedClient::new(Reply::Result(created())),
        );

        let response = gateway.handle(items_request()).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(&response.body[..], b"502 Bad Gateway");
        assert!(gateway.client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let gateway = gateway(Reply::Refused);
        let response = gateway.handle(items_request()).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn missing_status_is_internal_error() {
        let gateway = gateway(Reply::Result(UpstreamResult::failed()));
        let response = gateway.handle(items_request()).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&response.body[..], b"500 Internal Server Error");
    }

    #[tokio::test]
    async fn error_statuses_pass_through() {
        for code in [204, 301, 404, 500, 502, 503] {
            let mut result = created();
            result.status_code = code;
            let gateway = gateway(Reply::Result(result));
            let response = gateway.handle(items_request()).await;
            assert_eq!(response.status.as_u16(), code);
        }
    }

    #[tokio::test]
    async fn every_request_resolves_again() {
        let gateway = gateway(Reply::Result(created()));
        let first = gateway.handle(items_request()).await;
        let second = gateway.handle(items_request()).await;

        assert_eq!(*gateway.resolver.lookups.lock().unwrap(), 2);
        assert_eq!(gateway.client.seen.lock().unwrap().len(), 2);
        assert_eq!(first.status, second.status);
        assert_eq!(first.body, second.body);
        assert_eq!(first.headers, second.headers);
    }
}
