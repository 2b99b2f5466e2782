//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Resolve upstream → Metrics → Bind listener → Serve
//!
//! Shutdown (signals.rs):
//!     SIGTERM/SIGINT → Trigger → Stop accepting → Finish in-flight requests → Exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and exits non-zero
//! - The listener is bound last (traffic only when ready)

pub mod signals;
pub mod startup;

pub use signals::Shutdown;
pub use startup::{run, StartupError};
