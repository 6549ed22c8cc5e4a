//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use salambot_gateway::config::{
    CircuitBreakerConfig, GatewayConfig, ServiceConfig, ServiceHealthConfig,
};
use salambot_gateway::net::{ForwardError, Transport, UpstreamRequest};
use salambot_gateway::{GatewayServer, Shutdown};

/// Read the request head and return the request target (path and query).
async fn read_request_target(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf)
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. The closure receives the request target.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let target = read_request_target(&mut socket).await;
                let (status, body) = f(target).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a backend answering every request with a chunked 200 whose chunks
/// are written after the given delays.
pub async fn start_streaming_backend(chunks: Vec<(Duration, &'static str)>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let chunks = Arc::new(chunks);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chunks = chunks.clone();
            tokio::spawn(async move {
                read_request_target(&mut socket).await;
                let head = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for (delay, data) in chunks.iter() {
                    tokio::time::sleep(*delay).await;
                    let chunk = format!("{:x}\r\n{}\r\n", data.len(), data);
                    if socket.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(b"0\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn service(name: &str, target: impl Into<String>, prefix: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        target: target.into(),
        path_prefix: prefix.to_string(),
        timeout_ms: 2_000,
        retry_count: 0,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
        },
        health: ServiceHealthConfig::default(),
    }
}

/// Defaults with the given services, background health checks and rate
/// limiting off.
pub fn config_with(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.services = services;
    config.health_check.enabled = false;
    config.rate_limit.enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config
}

/// Start a gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let server = GatewayServer::new(config).unwrap();

    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

type Script = dyn Fn(&UpstreamRequest, usize) -> Result<(u16, String), ForwardError> + Send + Sync;

/// In-memory transport answering from a script and recording every call.
pub struct ScriptedTransport {
    script: Box<Script>,
    calls: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedTransport {
    /// The script gets the request and the zero-based call index.
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&UpstreamRequest, usize) -> Result<(u16, String), ForwardError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(body: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Ok((200, body.to_string())))
    }

    pub fn calls(&self) -> Vec<UpstreamRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: UpstreamRequest,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Response<Body>, ForwardError>> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        let outcome = (self.script)(&request, index);
        Box::pin(async move {
            let (status, body) = outcome?;
            Ok(Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap())
        })
    }
}

/// Transport whose requests never complete.
#[derive(Default)]
pub struct HangingTransport {
    calls: AtomicUsize,
}

impl HangingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for HangingTransport {
    fn send(
        &self,
        _request: UpstreamRequest,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Response<Body>, ForwardError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures_util::future::pending())
    }
}
