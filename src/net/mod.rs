//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream host/port (fixed at startup)
//!     → resolver.rs (fresh IPv4 lookup per request, no caching)
//!     → connector.rs (TCP connect under a single deadline)
//!     → Hand off connected stream to the upstream HTTP client
//!
//! Connect outcomes:
//!     Connected | TimedOut | Refused | Unreachable | Failed
//! ```
//!
//! # Design Decisions
//! - Every request resolves again so DNS changes are observed immediately
//! - The connect deadline is the only enforced timeout on the upstream leg
//! - Failures keep the OS error so callers can tell refused from unreachable

pub mod connector;
pub mod resolver;

pub use connector::{ConnectError, TimedConnector};
pub use resolver::{AddressFamily, DnsResolver, Resolve, ResolveError, Source};
