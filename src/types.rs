//! Core types and errors for resource capture and source map reconstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Header attached to every resource materialized from a source map.
pub const SOURCE_MARKER_HEADER: &str = "X-Source";

/// Value of [`SOURCE_MARKER_HEADER`] on source-map-derived resources.
pub const SOURCE_MARKER_VALUE: &str = "SourceMap";

/// Errors that can occur while crawling a target.
#[derive(Error, Debug)]
pub enum SpiderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to start browser: {0}")]
    BrowserLaunch(String),

    #[error("Failed to crawl {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Response body unavailable for request {request_id}: {reason}")]
    BodyUnavailable { request_id: String, reason: String },

    #[error("Source map download failed for {url}: {reason}")]
    SourceMapDownload { url: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, SpiderError>;

/// One captured network response body plus its metadata.
///
/// The URL is the unique key in a [`ResourceStore`](crate::store::ResourceStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    /// Absolute URL of the resource.
    pub url: String,
    /// Request method, when known. Response notifications do not carry it.
    pub method: Option<String>,
    /// HTTP status code reported by the browser (or 200 for synthesized files).
    pub status_code: i64,
    /// MIME type as reported by the browser, or derived from the file extension.
    pub mime_type: String,
    /// Raw body bytes. May be empty.
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// When the resource was captured.
    pub response_time: DateTime<Utc>,
}

impl Resource {
    /// Content interpreted as text (lossy).
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Whether this resource was materialized from a source map.
    pub fn is_source_map_derived(&self) -> bool {
        self.headers
            .get(SOURCE_MARKER_HEADER)
            .is_some_and(|v| v == SOURCE_MARKER_VALUE)
    }
}

/// Configuration for plain HTTP requests made outside the browser.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: "Mozilla/5.0 (compatible; spidermap/0.1)".to_string(),
            proxy: None,
        }
    }
}

impl HttpConfig {
    /// Build a `reqwest` client honoring the timeout, user agent and proxy.
    pub fn client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .user_agent(&self.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(30));

        if let Some(ref proxy) = self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(builder.build()?)
    }
}

/// Per-target result returned to callers and printed with `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Target URL that was crawled.
    pub target: String,
    /// Directory the resources were written to.
    pub output_dir: String,
    /// Resources captured from the network.
    pub captured_count: usize,
    /// Original source files reconstructed from source maps.
    pub source_files_count: usize,
    /// Total resources after merging.
    pub total_count: usize,
    /// Crawl duration in seconds.
    pub duration_secs: f64,
    /// Fatal error, if the target failed.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(headers: HashMap<String, String>) -> Resource {
        Resource {
            url: "https://example.com/app.js".to_string(),
            method: None,
            status_code: 200,
            mime_type: "application/javascript".to_string(),
            content: b"console.log(1)".to_vec(),
            headers,
            response_time: Utc::now(),
        }
    }

    #[test]
    fn test_source_map_marker() {
        let plain = resource(HashMap::new());
        assert!(!plain.is_source_map_derived());

        let mut headers = HashMap::new();
        headers.insert(SOURCE_MARKER_HEADER.to_string(), SOURCE_MARKER_VALUE.to_string());
        let derived = resource(headers);
        assert!(derived.is_source_map_derived());
    }

    #[test]
    fn test_text_is_lossy() {
        let mut res = resource(HashMap::new());
        res.content = vec![b'a', 0xff, b'b'];
        assert_eq!(res.text(), "a\u{fffd}b");
    }
}
