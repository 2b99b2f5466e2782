//! Configuration schema definitions.

use std::time::Duration;

/// Default upstream port when none is given on the command line.
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

/// Default bound on the upstream TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Root configuration for the gateway.
///
/// Every field is fixed at startup. The connect timeout in particular is the
/// single bound shared by all upstream connection attempts for the lifetime
/// of the process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upstream host name, re-resolved on every request.
    pub upstream_host: String,

    /// Upstream TCP port.
    pub upstream_port: u16,

    /// Address the inbound request server binds to.
    pub listen_address: String,

    /// Bounded wait for the upstream TCP handshake.
    pub connect_timeout: Duration,

    /// Speak HTTP/1.1 to the upstream (HTTP/1.0 otherwise).
    pub use_http11: bool,

    /// Largest inbound request body buffered for forwarding.
    pub max_body_size: usize,

    /// Optional Prometheus exporter bind address.
    pub metrics_address: Option<String>,
}

impl GatewayConfig {
    /// Configuration for `host` with every other field at its default.
    pub fn for_upstream(host: impl Into<String>) -> Self {
        Self {
            upstream_host: host.into(),
            ..Self::default()
        }
    }

    /// `Host` header value sent upstream.
    pub fn host_header(&self) -> String {
        if self.upstream_port == DEFAULT_UPSTREAM_PORT {
            self.upstream_host.clone()
        } else {
            format!("{}:{}", self.upstream_host, self.upstream_port)
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_host: String::new(),
            upstream_port: DEFAULT_UPSTREAM_PORT,
            listen_address: "127.0.0.1:8080".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            use_http11: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
            metrics_address: None,
        }
    }
}
