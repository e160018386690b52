//! Direct HTTP retrieval for bodies the browser could not hand back.

use crate::types::{HttpConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace};

/// Best-effort body retrieval outside the browser.
///
/// `None` means "no content", never a failure the caller has to handle.
#[async_trait]
pub trait FallbackFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

/// Plain GET fetcher with its own bounded timeout.
#[derive(Clone)]
pub struct FallbackFetcher {
    client: Client,
}

impl FallbackFetcher {
    /// Create a fallback fetcher. `config.timeout_secs` bounds each request.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: config.client()?,
        })
    }
}

#[async_trait]
impl FallbackFetch for FallbackFetcher {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        trace!("Fallback fetch: {}", url);

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Fallback fetch failed for {}: {}", url, e);
                return None;
            }
        };

        // Non-2xx bodies are still content.
        let status = response.status();
        match response.bytes().await {
            Ok(bytes) => {
                trace!("Fallback fetched {} ({}, {} bytes)", url, status, bytes.len());
                Some(bytes.to_vec())
            }
            Err(e) => {
                debug!("Fallback body read failed for {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on loopback and return its base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_error_status_still_returns_body() {
        let base = serve_once("404 Not Found", "x").await;
        let fetcher = FallbackFetcher::new(&HttpConfig::default()).unwrap();

        let body = fetcher.fetch(&format!("{}/gone.js", base)).await;
        assert_eq!(body, Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_success_status_returns_body() {
        let base = serve_once("200 OK", "console.log(1);").await;
        let fetcher = FallbackFetcher::new(&HttpConfig::default()).unwrap();

        let body = fetcher.fetch(&format!("{}/app.js", base)).await;
        assert_eq!(body, Some(b"console.log(1);".to_vec()));
    }

    #[tokio::test]
    async fn test_transport_error_yields_none() {
        let config = HttpConfig {
            timeout_secs: 2,
            ..HttpConfig::default()
        };
        let fetcher = FallbackFetcher::new(&config).unwrap();

        // Port 9 (discard) on loopback is not expected to accept HTTP.
        let body = fetcher.fetch("http://127.0.0.1:9/missing.js").await;
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_url_yields_none() {
        let fetcher = FallbackFetcher::new(&HttpConfig::default()).unwrap();
        assert!(fetcher.fetch("not a url").await.is_none());
    }
}
