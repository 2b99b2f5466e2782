//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with a single catch-all handler
//! - Wire up middleware (request ID, tracing)
//! - Read one request per connection, run it through the router and write
//!   the response with headers in wire order
//! - Serve until the shutdown signal fires
//!
//! # Design Decisions
//! - Connections are never kept alive; every response carries
//!   `Connection: close`
//! - Bodies are buffered up to `max_body_size` before routing

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::headers::{
    append_to_map, entries_from_map, frame_headers, merge_with_map, HeaderEntry, OrderedHeaders,
};
use crate::http::request::{InboundRequest, MakeRequestUuidV4};
use crate::http::response::GatewayResponse;
use crate::http::upstream::UpstreamClient;
use crate::http::wire::{encode_response_head, BodyFraming, RequestHead, WireError, WireStream};
use crate::net::Resolve;

/// How long a rejected client may keep sending before the socket closes.
const REJECT_LINGER: Duration = Duration::from_millis(500);

/// Back-off after a failed accept, e.g. on descriptor exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Inbound HTTP server feeding the gateway.
#[derive(Debug)]
pub struct HttpServer {
    router: Router,
    config: Arc<GatewayConfig>,
}

impl HttpServer {
    /// Server forwarding through the default gateway for `config`.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_gateway(Gateway::new(config))
    }

    pub fn with_gateway<R: Resolve, C: UpstreamClient>(gateway: Gateway<R, C>) -> Self {
        let config = Arc::new(gateway.config().clone());
        let router = Self::build_router(Arc::new(gateway));
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router<R: Resolve, C: UpstreamClient>(gateway: Arc<Gateway<R, C>>) -> Router {
        Router::new()
            .route("/", any(gateway_handler::<R, C>))
            .route("/{*path}", any(gateway_handler::<R, C>))
            .with_state(gateway)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// On shutdown the listener closes at once and in-flight connections
    /// are allowed to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream_host = %self.config.upstream_host,
            upstream_port = self.config.upstream_port,
            "HTTP server starting"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let router = self.router.clone();
                        let max_body_size = self.config.max_body_size;
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(router, stream, max_body_size).await {
                                tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        let in_flight = connections.len();
        if in_flight > 0 {
            tracing::info!(connections = in_flight, "Waiting for in-flight requests");
        }
        while connections.join_next().await.is_some() {}

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Serve exactly one request on `io`, then close it.
async fn serve_connection<S>(router: Router, io: S, max_body_size: usize) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut wire = WireStream::new(io);
    let (head, body) = match read_request(&mut wire, max_body_size).await {
        Ok(request) => request,
        Err(e) => {
            let Some(status) = e.status() else {
                return Err(e);
            };
            tracing::warn!(error = %e, status = status.as_u16(), "Rejecting unreadable request");
            let page = GatewayResponse::error(status);
            let headers = finish_headers(page.headers, page.body.len());
            wire.write_message(&encode_response_head(Version::HTTP_11, status, &headers), &page.body)
                .await?;
            wire.close_lingering(REJECT_LINGER).await?;
            return Ok(());
        }
    };

    let version = head.version;
    let method = head.method.clone();
    let response = match into_router_request(head, body) {
        Some(request) => match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
        None => GatewayResponse::error(StatusCode::BAD_REQUEST).into_response(),
    };

    write_response(&mut wire, version, &method, response).await?;
    wire.close().await?;
    Ok(())
}

async fn read_request<S>(
    wire: &mut WireStream<S>,
    max_body_size: usize,
) -> Result<(RequestHead, bytes::Bytes), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = wire.read_request_head().await?;
    let framing = BodyFraming::for_request(&head.headers)?;
    if let BodyFraming::Length(len) = framing {
        if len > max_body_size {
            return Err(WireError::BodyTooLarge { limit: max_body_size });
        }
    }
    if framing != BodyFraming::Empty && head.expects_continue() {
        wire.write_message(b"HTTP/1.1 100 Continue\r\n\r\n", &[]).await?;
    }
    let body = wire.read_body(framing, max_body_size).await?;
    Ok((head, body))
}

/// Rebuild a router request; the wire-order headers ride along in the
/// extensions. `None` when the target is not a valid URI.
fn into_router_request(head: RequestHead, body: bytes::Bytes) -> Option<Request<Body>> {
    let uri: Uri = head.target.parse().ok()?;
    let mut request = Request::new(Body::from(body));
    *request.method_mut() = head.method;
    *request.uri_mut() = uri;
    *request.version_mut() = head.version;
    append_to_map(request.headers_mut(), &head.headers);
    request.extensions_mut().insert(OrderedHeaders(head.headers));
    Some(request)
}

async fn write_response<S>(
    wire: &mut WireStream<S>,
    version: Version,
    method: &Method,
    response: Response,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (parts, body) = response.into_parts();
    let headers = match parts.extensions.get::<OrderedHeaders>() {
        Some(OrderedHeaders(ordered)) => merge_with_map(ordered, &parts.headers),
        None => entries_from_map(&parts.headers),
    };
    let (status, headers, body) = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => (parts.status, headers, body),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer response body");
            let page = GatewayResponse::error(StatusCode::INTERNAL_SERVER_ERROR);
            (page.status, page.headers, page.body)
        }
    };

    let bodiless = method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    let headers = if bodiless {
        with_connection_close(headers)
    } else {
        finish_headers(headers, body.len())
    };
    let body = if method == Method::HEAD { &[][..] } else { &body[..] };

    wire.write_message(&encode_response_head(version, status, &headers), body)
        .await?;
    Ok(())
}

/// Frame a buffered body of `len` bytes and make sure the connection is
/// announced as closing.
fn finish_headers(headers: Vec<HeaderEntry>, len: usize) -> Vec<HeaderEntry> {
    with_connection_close(frame_headers(&headers, len, true))
}

fn with_connection_close(mut headers: Vec<HeaderEntry>) -> Vec<HeaderEntry> {
    if !headers.iter().any(|h| h.is("connection")) {
        headers.push(HeaderEntry::connection_close());
    }
    headers
}

/// Forwards the buffered request through the gateway.
async fn gateway_handler<R: Resolve, C: UpstreamClient>(
    State(gateway): State<Arc<Gateway<R, C>>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %parts.uri, error = %e, "Failed to read request body");
            return GatewayResponse::error(StatusCode::BAD_REQUEST).into_response();
        }
    };

    gateway
        .handle(InboundRequest::from_parts(&parts, body))
        .await
        .into_response()
}
