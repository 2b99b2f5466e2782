//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection
//!     → wire.rs (read one request, headers kept in wire order)
//!     → server.rs (Axum router, request ID, tracing)
//!     → request.rs (buffer into InboundRequest)
//!     → [gateway resolves and forwards]
//!     → headers.rs (filter both legs, force Connection: close)
//!     → upstream.rs (one HTTP/1.x exchange per request, via wire.rs)
//!     → response.rs (relay or error page)
//!     → wire.rs (write the response in entry order, then close)
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;
pub mod wire;

pub use headers::{HeaderEntry, OrderedHeaders};
pub use request::{InboundRequest, MakeRequestUuidV4, X_REQUEST_ID};
pub use response::GatewayResponse;
pub use server::HttpServer;
pub use upstream::{Http1UpstreamClient, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResult};
