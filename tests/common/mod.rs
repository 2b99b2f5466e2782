//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use upstream_gateway::http::Http1UpstreamClient;
use upstream_gateway::net::{Resolve, ResolveError, Source, TimedConnector};
use upstream_gateway::{Gateway, GatewayConfig, HttpServer, Shutdown};

/// A backend answering every connection with the same raw bytes.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Raw request (head and body) of every connection, in arrival order.
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
    pub connections: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Next captured request, exactly as received.
    pub async fn next_raw_request(&mut self) -> Vec<u8> {
        self.requests.recv().await.expect("backend stopped")
    }

    /// Next captured request as text.
    pub async fn next_request(&mut self) -> String {
        String::from_utf8_lossy(&self.next_raw_request().await).into_owned()
    }
}

/// Start a backend that writes `response` verbatim and closes.
pub async fn start_raw_backend(response: &'static str) -> MockBackend {
    start_bytes_backend(response.as_bytes()).await
}

/// Like [`start_raw_backend`], for responses that are not valid UTF-8.
pub async fn start_bytes_backend(response: &'static [u8]) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let _ = tx.send(request);
                        let _ = socket.write_all(response).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend {
        addr,
        requests,
        connections,
    }
}

/// Start a well-behaved HTTP/1.1 backend.
pub async fn start_mock_backend(
    status_line: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> MockBackend {
    let mut response = format!("HTTP/1.1 {status_line}\r\n");
    for (k, v) in headers {
        response.push_str(&format!("{k}: {v}\r\n"));
    }
    response.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    start_raw_backend(Box::leak(response.into_boxed_str())).await
}

/// Read a request head plus a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if let Some(end) = find_head_end(&data) {
            let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + length {
                break;
            }
        }
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    data
}

/// Write `request` to `addr` as-is and read until the server closes.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request).await.unwrap();
    let mut response = Vec::new();
    socket.read_to_end(&mut response).await.unwrap();
    response
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Resolver answering from a fixed host table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, ip: Ipv4Addr) -> Self {
        self.table.insert(host.to_string(), ip);
        self
    }
}

impl Resolve for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> Result<Source, ResolveError> {
        self.table
            .get(host)
            .map(|ip| Source::v4(*ip))
            .ok_or_else(|| ResolveError::NoAddress {
                host: host.to_string(),
            })
    }
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Serve `config` through `resolver` on an ephemeral local port.
pub async fn spawn_gateway<R: Resolve>(config: GatewayConfig, resolver: R) -> RunningGateway {
    let client = Http1UpstreamClient::new(TimedConnector::new(config.connect_timeout));
    let gateway = Gateway::with_parts(Arc::new(config), resolver, client);
    let server = HttpServer::with_gateway(gateway);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    RunningGateway { addr, shutdown }
}

/// Gateway whose upstream `host` resolves to loopback on `port`.
pub async fn spawn_local_gateway(host: &str, port: u16) -> RunningGateway {
    let mut config = GatewayConfig::for_upstream(host);
    config.upstream_port = port;
    spawn_gateway(config, StaticResolver::default().with(host, Ipv4Addr::LOCALHOST)).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
