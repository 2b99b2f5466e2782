//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Resolve the upstream once before accepting traffic
//! - Start the metrics exporter when configured
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener starts last (traffic only when ready)

use std::io;
use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{validate_config, GatewayConfig, ValidationError};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::{DnsResolver, Resolve, ResolveError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("initial resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything up to, but not including, serving: validation, the initial
/// lookup, metrics and the bound listener.
pub async fn prepare(config: GatewayConfig) -> Result<(HttpServer, TcpListener), StartupError> {
    validate_config(&config).map_err(StartupError::Config)?;

    let source = DnsResolver
        .resolve(&config.upstream_host, config.upstream_port)
        .await?;
    tracing::info!(
        upstream_host = %config.upstream_host,
        upstream_port = config.upstream_port,
        resolved = %source,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Upstream resolved"
    );

    if let Some(addr) = &config.metrics_address {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| StartupError::Config(vec![ValidationError::MetricsAddress(addr.clone())]))?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listen_address.clone(),
            source,
        })?;

    Ok((HttpServer::new(config), listener))
}

/// Start the gateway and serve until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let (server, listener) = prepare(config).await?;

    let shutdown = Shutdown::on_signals();

    server
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Serve)
}
