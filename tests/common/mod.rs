//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use guardian::config::{GuardianConfig, ListenerConfig, ServiceConfig};
use guardian::{Gateway, RunningGateway};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Raw upstream response produced by a programmable backend.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        302 => "Found",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Start a programmable raw-TCP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    serve_programmable(listener, f);
    addr
}

/// Serve on an already bound listener.
pub fn serve_programmable<F, Fut>(listener: TcpListener, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let f = Arc::new(f);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Read the request head; bodies in these tests are tiny.
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;

                        let response = f().await;
                        let mut raw = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            raw.push_str(&format!("{name}: {value}\r\n"));
                        }
                        raw.push_str("\r\n");
                        raw.push_str(&response.body);

                        let _ = socket.write_all(raw.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a mock backend that returns a fixed body.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { MockResponse::ok(body) }).await
}

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// One listener on an ephemeral port fronting an unsupervised `frontend`
/// service on `upstream_port`. Supervision and probes are off.
pub fn gateway_config(upstream_port: u16) -> GuardianConfig {
    let mut config = GuardianConfig {
        listeners: vec![ListenerConfig::new("frontend", "127.0.0.1:0", "frontend")],
        services: vec![ServiceConfig::external("frontend", upstream_port)],
        ..GuardianConfig::default()
    };
    config.supervisor.enabled = false;
    config.health_check.enabled = false;
    config.proxy.retry_base_delay_ms = 50;
    config
}

pub async fn start_gateway(config: GuardianConfig) -> RunningGateway {
    Gateway::build(config).unwrap().start().await.unwrap()
}

/// Base URL of a running gateway listener.
pub fn url(gateway: &RunningGateway, listener: &str, path: &str) -> String {
    format!("http://{}{}", gateway.addr(listener).unwrap(), path)
}

/// Non-pooled client that never follows redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
