//! TCP connect with a bounded wait.
//!
//! # Responsibilities
//! - Open a fresh IPv4/IPv6 TCP socket for every attempt
//! - Bound the handshake by the configured connect timeout
//! - Classify failures (timeout, refused, unreachable, other)
//!
//! # Design Decisions
//! - A single `tokio::time::timeout` covers socket connect, the writability
//!   wait and the pending-error check; interrupted waits are retried by the
//!   runtime inside the same deadline and never re-arm it
//! - The socket is owned by the connect future, so every failure path drops
//!   (closes) it and nothing is left half-configured

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};

/// Failure to establish an upstream TCP connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The socket could not be created or configured.
    #[error("failed to set up socket: {0}")]
    Setup(#[source] io::Error),

    /// The handshake did not finish within the deadline.
    #[error("connect timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },

    #[error("connection refused: {0}")]
    Refused(#[source] io::Error),

    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("connect failed: {0}")]
    Failed(#[source] io::Error),
}

impl ConnectError {
    /// Classify an error reported by the connect attempt.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused(err),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                Self::Unreachable(err)
            }
            io::ErrorKind::TimedOut => Self::TimedOut {
                timeout: Duration::ZERO,
            },
            _ => Self::Failed(err),
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::TimedOut { .. } => io::ErrorKind::TimedOut,
            Self::Setup(e) | Self::Refused(e) | Self::Unreachable(e) | Self::Failed(e) => e.kind(),
        }
    }

    /// The OS error code behind this failure, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::TimedOut { .. } => None,
            Self::Setup(e) | Self::Refused(e) | Self::Unreachable(e) | Self::Failed(e) => {
                e.raw_os_error()
            }
        }
    }

    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::TimedOut { .. } => "timeout",
            Self::Refused(_) => "refused",
            Self::Unreachable(_) => "unreachable",
            Self::Failed(_) => "connect",
        }
    }
}

/// Opens upstream connections, waiting at most `timeout` for each.
#[derive(Debug, Clone, Copy)]
pub struct TimedConnector {
    timeout: Duration,
}

impl TimedConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to `addr`, failing with [`ConnectError::TimedOut`] once the
    /// deadline passes regardless of handshake progress.
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(ConnectError::Setup)?;
        socket.set_nodelay(true).map_err(ConnectError::Setup)?;

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => {
                tracing::trace!(
                    upstream = %addr,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upstream connected"
                );
                Ok(stream)
            }
            Ok(Err(e)) => match ConnectError::from_io(e) {
                ConnectError::TimedOut { .. } => Err(ConnectError::TimedOut {
                    timeout: self.timeout,
                }),
                err => Err(err),
            },
            Err(_) => Err(ConnectError::TimedOut {
                timeout: self.timeout,
            }),
        }
    }
}
