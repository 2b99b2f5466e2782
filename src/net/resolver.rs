//! Upstream name resolution.
//!
//! Lookups are restricted to IPv4 stream endpoints and the first address in
//! resolver order is used. Nothing is cached between calls.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;

/// Address family of a resolved [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    None,
    V4,
    V6,
}

/// A resolved upstream endpoint. Built fresh for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub ip: Option<IpAddr>,
    pub family: AddressFamily,
}

impl Source {
    pub fn v4(ip: Ipv4Addr) -> Self {
        Self {
            ip: Some(IpAddr::V4(ip)),
            family: AddressFamily::V4,
        }
    }

    /// Whether resolution produced a usable address.
    pub fn is_resolved(&self) -> bool {
        self.ip.is_some() && self.family != AddressFamily::None
    }

    /// Socket address for `port`, if resolved.
    pub fn socket_addr(&self, port: u16) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, port))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{ip}"),
            None => f.write_str("unresolved"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup itself failed.
    #[error("failed to resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The lookup succeeded but returned no IPv4 address.
    #[error("no IPv4 address found for {host}")]
    NoAddress { host: String },
}

/// Turns the upstream host name into a [`Source`].
pub trait Resolve: Send + Sync + 'static {
    fn resolve(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Source, ResolveError>> + Send;
}

/// Resolver backed by the system's `getaddrinfo` through Tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Source, ResolveError> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?;

        first_v4(addrs).ok_or_else(|| ResolveError::NoAddress {
            host: host.to_string(),
        })
    }
}

/// Pick the first IPv4 address in resolver order.
fn first_v4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<Source> {
    addrs.into_iter().find_map(|addr| match addr {
        SocketAddr::V4(v4) => Some(Source::v4(*v4.ip())),
        SocketAddr::V6(_) => None,
    })
}
