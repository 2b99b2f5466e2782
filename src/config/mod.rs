//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line
//!     → cli.rs (clap parsing, positional host/port)
//!     → schema.rs (GatewayConfig with defaults)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc with the gateway and connector
//! ```
//!
//! # Design Decisions
//! - Config is built once at startup and never mutated afterwards
//! - No config file and no environment lookups (besides `RUST_LOG`)
//! - Validation reports every violation, not just the first

pub mod cli;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use schema::GatewayConfig;
pub use validation::{validate_config, ValidationError};
