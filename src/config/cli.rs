//! Command line interface.

use std::time::Duration;

use clap::Parser;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Parser)]
#[command(name = "upstream-gateway")]
#[command(about = "Forward every request to a single upstream HTTP server", long_about = None)]
pub struct Cli {
    /// Upstream host name or address
    pub host: String,

    /// Upstream port
    #[arg(default_value = "80", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Address to accept client requests on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Upstream connect timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub connect_timeout_ms: u64,

    /// Speak HTTP/1.0 to the upstream instead of HTTP/1.1
    #[arg(long)]
    pub http10: bool,

    /// Largest request body forwarded upstream, in bytes
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub max_body_size: usize,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Build the startup configuration from parsed arguments.
    pub fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            upstream_host: self.host,
            upstream_port: self.port,
            listen_address: self.listen,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            use_http11: !self.http10,
            max_body_size: self.max_body_size,
            metrics_address: self.metrics_address,
        }
    }
}
