//! Source map extractor.
//!
//! Given an already-captured JavaScript or CSS resource, finds its source map
//! reference, downloads (or decodes) the map and materializes one synthetic
//! [`Resource`] per embedded original source file.

use crate::sourcemap::document::SourceMapDocument;
use crate::sourcemap::mime::mime_for_path;
use crate::sourcemap::reference::{decode_data_url, find_reference, resolve_reference, MapLocation};
use crate::types::{HttpConfig, Resource, Result, SpiderError, SOURCE_MARKER_HEADER, SOURCE_MARKER_VALUE};
use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Timeout for a single source map download.
pub const DEFAULT_MAP_TIMEOUT_SECS: u64 = 30;

/// Source map downloads per second, per extractor.
pub const DEFAULT_MAP_RATE_LIMIT: u32 = 10;

/// Download of source map documents.
#[async_trait]
pub trait MapFetcher: Send + Sync {
    /// Fetch the raw map document. Anything but HTTP 200 is an error.
    async fn fetch_map(&self, url: &str) -> Result<Vec<u8>>;
}

/// Rate-limited HTTP map fetcher.
pub struct HttpMapFetcher {
    client: Client,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl HttpMapFetcher {
    /// Create a fetcher allowing `rate_limit` downloads per second.
    pub fn new(config: &HttpConfig, rate_limit: u32) -> Result<Self> {
        let per_second = NonZeroU32::new(rate_limit)
            .or(NonZeroU32::new(DEFAULT_MAP_RATE_LIMIT))
            .unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client: config.client()?,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }
}

#[async_trait]
impl MapFetcher for HttpMapFetcher {
    async fn fetch_map(&self, url: &str) -> Result<Vec<u8>> {
        self.rate_limiter.until_ready().await;
        trace!("Downloading source map: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SpiderError::SourceMapDownload {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Terminal state of one resource passing through the extractor.
///
/// `map_url` is the downloaded map's URL, or the resource's own URL for
/// inline maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// MIME type is neither JavaScript nor CSS.
    Ineligible,
    /// No `sourceMappingURL` comment in the content.
    NoReference,
    /// The map could not be fetched or decoded.
    DownloadFailed { map_url: String, error: String },
    /// The map was fetched but is not a valid source map document.
    ParseFailed { map_url: String, error: String },
    /// Zero or more original sources were reconstructed.
    Materialized { map_url: String, resources: Vec<Resource> },
}

impl Extraction {
    /// Synthesized resources, empty for every non-success state.
    pub fn into_resources(self) -> Vec<Resource> {
        match self {
            Extraction::Materialized { resources, .. } => resources,
            _ => Vec::new(),
        }
    }
}

/// Whether a resource is a candidate for source map scanning.
///
/// Case-sensitive substring match on the MIME type.
pub fn is_eligible(resource: &Resource) -> bool {
    resource.mime_type.contains("javascript") || resource.mime_type.contains("css")
}

/// Reconstructs original sources from source maps referenced by captured resources.
#[derive(Clone)]
pub struct SourceMapExtractor {
    fetcher: Arc<dyn MapFetcher>,
}

impl SourceMapExtractor {
    pub fn new(fetcher: Arc<dyn MapFetcher>) -> Self {
        Self { fetcher }
    }

    /// Extractor backed by [`HttpMapFetcher`].
    pub fn http(config: &HttpConfig, rate_limit: u32) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpMapFetcher::new(config, rate_limit)?)))
    }

    /// Run one resource through the extractor.
    ///
    /// Returns `Err` only when the reference cannot be resolved into a URL.
    /// Download and parse failures are reported as [`Extraction`] states.
    pub async fn extract(&self, resource: &Resource) -> Result<Extraction> {
        if !is_eligible(resource) {
            return Ok(Extraction::Ineligible);
        }

        let text = resource.text();
        let Some(reference) = find_reference(&text) else {
            return Ok(Extraction::NoReference);
        };

        let location = resolve_reference(&resource.url, reference)?;
        let map_url = match &location {
            MapLocation::Remote(url) => url.clone(),
            MapLocation::Inline(_) => resource.url.clone(),
        };
        let origin = Url::parse(&map_url)?;

        let bytes = match &location {
            MapLocation::Remote(url) => {
                info!("Found source map: {}", url);
                self.fetcher.fetch_map(url).await
            }
            MapLocation::Inline(data_url) => {
                debug!("Found inline source map in {}", resource.url);
                decode_data_url(data_url).ok_or_else(|| SpiderError::SourceMapDownload {
                    url: resource.url.clone(),
                    reason: "undecodable inline data URL".to_string(),
                })
            }
        };

        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(Extraction::DownloadFailed {
                    map_url,
                    error: e.to_string(),
                })
            }
        };

        let document = match SourceMapDocument::parse(&bytes) {
            Ok(document) => document,
            Err(e) => {
                return Ok(Extraction::ParseFailed {
                    map_url,
                    error: e.to_string(),
                })
            }
        };

        let resources = materialize(&document, &origin);
        Ok(Extraction::Materialized { map_url, resources })
    }

    /// Run one resource through the extractor, logging recoverable failures.
    pub async fn extract_from_resource(&self, resource: &Resource) -> Result<Vec<Resource>> {
        match self.extract(resource).await? {
            Extraction::Materialized { map_url, resources } => {
                info!("Extracted {} source files from {}", resources.len(), map_url);
                Ok(resources)
            }
            Extraction::DownloadFailed { map_url, error } => {
                warn!("Failed to download source map {}: {}", map_url, error);
                Ok(Vec::new())
            }
            Extraction::ParseFailed { map_url, error } => {
                warn!("Failed to parse source map {}: {}", map_url, error);
                Ok(Vec::new())
            }
            Extraction::Ineligible | Extraction::NoReference => Ok(Vec::new()),
        }
    }
}

/// Synthesize one resource per source entry with embedded content, in
/// `sources` order.
pub fn materialize(document: &SourceMapDocument, origin: &Url) -> Vec<Resource> {
    let response_time = Utc::now();

    document
        .embedded_sources()
        .map(|(_, source, content)| {
            let path = clean_source_path(source, &document.source_root);
            let mut headers = HashMap::new();
            headers.insert(SOURCE_MARKER_HEADER.to_string(), SOURCE_MARKER_VALUE.to_string());

            Resource {
                url: synthesize_url(origin, &path),
                method: Some("GET".to_string()),
                status_code: 200,
                mime_type: mime_for_path(&path).to_string(),
                content: content.as_bytes().to_vec(),
                headers,
                response_time,
            }
        })
        .collect()
}

/// Normalize a `sources` entry, prefixing the cleaned `sourceRoot` if any.
pub fn clean_source_path(source: &str, source_root: &str) -> String {
    let path = source
        .strip_prefix("webpack:///")
        .or_else(|| source.strip_prefix("webpack://"))
        .unwrap_or(source);
    let path = path.strip_prefix("./").unwrap_or(path);

    let root = source_root.strip_prefix("webpack://").unwrap_or(source_root);
    let root = root.trim_start_matches('/');
    if root.is_empty() {
        return path.to_string();
    }

    path_clean::clean(format!("{root}/{path}"))
        .to_string_lossy()
        .into_owned()
}

/// `<scheme>://<host[:port]>/<path>` under the origin of `origin`.
pub fn synthesize_url(origin: &Url, path: &str) -> String {
    let host = origin.host_str().unwrap_or_default();
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    format!("{}://{}/{}", origin.scheme(), authority, path.trim_start_matches('/'))
}
