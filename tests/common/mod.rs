//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use failover_proxy::config::ProxyConfig;
use failover_proxy::http::HttpServer;
use failover_proxy::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A raw-TCP backend that counts hits and records request heads.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// `host:port` form used in the backend list.
    pub fn name(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request heads seen so far, lowercased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a backend that always answers `200` with `body`.
pub async fn start_mock_backend(body: &'static str) -> MockBackend {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let (h, r) = (hits.clone(), requests.clone());
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let (f, hits, requests) = (f.clone(), h.clone(), r.clone());
                    tokio::spawn(async move {
                        let Some(head) = read_request(&mut socket).await else {
                            return;
                        };
                        hits.fetch_add(1, Ordering::SeqCst);
                        requests.lock().unwrap().push(head);

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            504 => "504 Gateway Timeout",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\n\
                             Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, hits, requests }
}

/// Start a backend that accepts connections and never answers.
pub async fn start_hanging_backend() -> MockBackend {
    start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        (200, String::new())
    })
    .await
}

/// An address with nothing listening on it.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Read the request head (lowercased) and drain any `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(format!("{head}{}", String::from_utf8_lossy(&body)))
}

/// Proxy config for local plain-HTTP backends.
pub fn proxy_config(backends: Vec<String>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.balancer.backends = backends;
    config.balancer.backend_scheme = "http".into();
    config.gateway.primary_domain = "primary.example".into();
    config.timeouts.attempt_secs = 1;
    config
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
