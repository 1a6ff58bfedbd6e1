//! HTTP probe implementation.

use super::{Fetch, ProbeError};
use crate::domain::{Method, ProbeResult, Target};

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Fetches probe results over HTTP(S) with a shared client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn attempt(&self, target: &Target) -> Result<(u16, Option<bool>), ProbeError> {
        let method = match target.method() {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        };

        let response = self
            .client
            .request(method, target.url().clone())
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let status = response.status().as_u16();

        // Only pay for the body when there is something to match.
        let matched = match target.pattern() {
            Some(pattern) => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ProbeError::Body(e.to_string()))?;
                Some(pattern.is_match(&body))
            }
            None => None,
        };

        Ok((status, matched))
    }
}

#[async_trait]
impl Fetch for HttpProber {
    async fn fetch(&self, target: &Target, deadline: Duration) -> Result<ProbeResult, ProbeError> {
        let start = Instant::now();

        match tokio::time::timeout(deadline, self.attempt(target)).await {
            Ok(Ok((status, matched))) => Ok(ProbeResult::completed(start.elapsed(), status, matched)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ProbeResult::unreachable(start.elapsed())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Sends response headers and part of the body, then stalls.
    async fn serve_stalled_body() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\nall ok")
                        .await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        addr
    }

    /// Answers every request with `body` as-is.
    async fn serve_raw_body(body: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_status_without_pattern() {
        let addr = serve(Router::new().route("/", get(|| async { "hello" }))).await;
        let target = Target::new(&format!("http://{addr}/"), "", "").unwrap();

        let result = HttpProber::new()
            .unwrap()
            .fetch(&target, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.status, Some(200));
        assert_eq!(result.matched, None);
        assert!(!result.unreachable);
    }

    #[tokio::test]
    async fn test_pattern_matching() {
        let addr = serve(Router::new().route("/", get(|| async { "all ok" }))).await;
        let prober = HttpProber::new().unwrap();

        let hit = Target::new(&format!("http://{addr}/"), "GET", "ok$").unwrap();
        let result = prober.fetch(&hit, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.status, Some(200));
        assert_eq!(result.matched, Some(true));

        let miss = Target::new(&format!("http://{addr}/"), "GET", "^nope").unwrap();
        let result = prober.fetch(&miss, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.matched, Some(false));
    }

    #[tokio::test]
    async fn test_pattern_matches_raw_body_bytes() {
        let addr = serve_raw_body(b"\xff\xfe status: ok").await;
        let prober = HttpProber::new().unwrap();
        let url = format!("http://{addr}/");

        let leading_bytes = Target::new(&url, "GET", r"(?-u)^\xff\xfe").unwrap();
        let result = prober.fetch(&leading_bytes, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.matched, Some(true));

        let text = Target::new(&url, "GET", "ok$").unwrap();
        let result = prober.fetch(&text, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.matched, Some(true));

        // Invalid bytes are not rewritten into replacement characters.
        let replacement = Target::new(&url, "GET", r"\x{FFFD}").unwrap();
        let result = prober.fetch(&replacement, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.matched, Some(false));
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let router = Router::new().route(
            "/",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let addr = serve(router).await;
        let target = Target::new(&format!("http://{addr}/"), "HEAD", "").unwrap();

        let result = HttpProber::new()
            .unwrap()
            .fetch(&target, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.status, Some(503));
        assert!(!result.unreachable);
    }

    #[tokio::test]
    async fn test_deadline_yields_unreachable() {
        let router = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        );
        let addr = serve(router).await;
        let target = Target::new(&format!("http://{addr}/"), "GET", "").unwrap();

        let deadline = Duration::from_millis(200);
        let result = HttpProber::new()
            .unwrap()
            .fetch(&target, deadline)
            .await
            .unwrap();
        assert!(result.unreachable);
        assert_eq!(result.status, None);
        assert_eq!(result.matched, None);
        assert!(result.elapsed >= deadline);
    }

    #[tokio::test]
    async fn test_body_not_read_without_pattern() {
        let addr = serve_stalled_body().await;
        let prober = HttpProber::new().unwrap();
        let deadline = Duration::from_millis(500);

        let plain = Target::new(&format!("http://{addr}/"), "GET", "").unwrap();
        let result = prober.fetch(&plain, deadline).await.unwrap();
        assert_eq!(result.status, Some(200));
        assert!(!result.unreachable);

        // With a pattern the stalled body has to be read and the deadline hits.
        let matching = Target::new(&format!("http://{addr}/"), "GET", "ok").unwrap();
        let result = prober.fetch(&matching, deadline).await.unwrap();
        assert!(result.unreachable);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = Target::new(&format!("http://{addr}/"), "GET", "").unwrap();
        let result = HttpProber::new()
            .unwrap()
            .fetch(&target, Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(ProbeError::Request(_))));
    }
}
