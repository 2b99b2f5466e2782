//! Single-upstream HTTP reverse-proxy gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────────┐
//!     ────────────────────┼─▶ http::server ──▶ gateway                       │
//!                         │                      │                           │
//!                         │                      ▼                           │
//!                         │              net::resolver (per request)         │
//!                         │                      │                           │
//!                         │                      ▼                           │
//!                         │   http::headers ──▶ http::upstream ──────────────┼──▶ Upstream
//!                         │                      │  (net::connector)         │
//!     Client Response     │                      ▼                           │
//!     ◀───────────────────┼── http::response ◀── relay                       │
//!                         └──────────────────────────────────────────────────┘
//! ```
//!
//! Every request re-resolves the upstream, opens a fresh connection with a
//! bounded connect wait, and closes it after one exchange.

use clap::Parser;

use upstream_gateway::config::Cli;
use upstream_gateway::lifecycle;
use upstream_gateway::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Cli::parse().into_config();
    tracing::info!("upstream-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    lifecycle::run(config)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Fatal error"))?;

    tracing::info!("Shutdown complete");
    Ok(())
}
