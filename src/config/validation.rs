//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (clap handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Validate bind addresses before the listener is created
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single configuration violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream host must not be empty")]
    EmptyHost,

    #[error("upstream port must be in 1..=65535")]
    InvalidPort,

    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,

    #[error("invalid listen address: {0}")]
    ListenAddress(String),

    #[error("invalid metrics address: {0}")]
    MetricsAddress(String),
}

/// Check `config` and collect every violation.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream_host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }
    if config.upstream_port == 0 {
        errors.push(ValidationError::InvalidPort);
    }
    if config.connect_timeout.is_zero() {
        errors.push(ValidationError::ZeroConnectTimeout);
    }
    if config.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::ListenAddress(config.listen_address.clone()));
    }
    if let Some(addr) = &config.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::MetricsAddress(addr.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
