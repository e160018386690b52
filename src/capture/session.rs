//! Browser session driving a real page through the Chrome DevTools Protocol.
//!
//! The session launches Chromium, forwards every `Network.responseReceived`
//! notification into a bounded channel consumed by a [`CapturePipeline`],
//! navigates to the target, scrolls to trigger lazy loading, and finally
//! waits for the pipeline to settle before tearing the browser down.
//!
//! Requires: Chrome or Chromium browser installed (or `spidermap setup`).

use crate::capture::fallback::FallbackFetch;
use crate::capture::pipeline::{BodySource, CaptureHook, CapturePipeline, CaptureStats, ResponseEvent};
use crate::store::ResourceStore;
use crate::types::{Result, SpiderError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, GetResponseBodyParams, Headers, RequestId,
    SetCookiesParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counter for generating unique browser profile directories
static BROWSER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capacity of the event channel between the browser and the pipeline.
const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Scroll positions (fraction of body height) and the pause after each.
const SCROLL_STEPS: &[(&str, u64)] = &[
    ("document.body.scrollHeight/4", 1),
    ("document.body.scrollHeight/2", 1),
    ("document.body.scrollHeight*3/4", 1),
    ("document.body.scrollHeight", 2),
    ("0", 1),
];

/// Options for one browsing session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Overall deadline for the session, in seconds.
    pub timeout_secs: u64,
    /// Run without a visible window.
    pub headless: bool,
    /// Explicit path to Chrome/Chromium executable.
    pub chrome_executable: Option<PathBuf>,
    /// Proxy server passed to the browser.
    pub proxy: Option<String>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Extra headers sent with every request.
    pub extra_headers: HashMap<String, String>,
    /// Cookies as `(name, value)` pairs, scoped to the target host.
    pub cookies: Vec<(String, String)>,
    /// Pause after the initial navigation, in seconds.
    pub initial_wait_secs: u64,
    /// Final wait for asynchronous resources, in seconds.
    pub settle_secs: u64,
    /// Bound on each browser-side body retrieval, in seconds.
    pub body_timeout_secs: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            headless: true,
            chrome_executable: None,
            proxy: None,
            user_agent: None,
            extra_headers: HashMap::new(),
            cookies: Vec::new(),
            initial_wait_secs: 3,
            settle_secs: 5,
            body_timeout_secs: 10,
        }
    }
}

/// Body retrieval through `Network.getResponseBody` on a live page.
#[derive(Clone)]
pub struct PageBodySource {
    page: Page,
}

impl PageBodySource {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl BodySource for PageBodySource {
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .map_err(|e| SpiderError::BodyUnavailable {
                request_id: request_id.to_string(),
                reason: e.to_string(),
            })?;

        decode_body(&response.body, response.base64_encoded).map_err(|reason| {
            SpiderError::BodyUnavailable {
                request_id: request_id.to_string(),
                reason,
            }
        })
    }
}

/// Decode a CDP body payload into raw bytes.
fn decode_body(body: &str, base64_encoded: bool) -> std::result::Result<Vec<u8>, String> {
    if !base64_encoded {
        return Ok(body.as_bytes().to_vec());
    }

    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| format!("invalid base64 body: {}", e))
}

/// Convert a CDP notification into the pipeline's event type.
fn to_response_event(event: &EventResponseReceived) -> ResponseEvent {
    let response = &event.response;

    // Only string-valued headers are kept.
    let headers = response
        .headers
        .inner()
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    ResponseEvent {
        request_id: event.request_id.inner().clone(),
        url: response.url.clone(),
        status_code: response.status,
        mime_type: response.mime_type.clone(),
        headers,
    }
}

/// Loads one page and fills a store with every response it produces.
#[async_trait]
pub trait PageCapture: Send + Sync {
    /// Returns once every body retrieval for `url` has settled.
    async fn load_and_capture(
        &self,
        url: &str,
        store: ResourceStore,
        fallback: Arc<dyn FallbackFetch>,
        hook: CaptureHook,
    ) -> Result<CaptureStats>;
}

/// Browser-based network capture using Chrome DevTools Protocol.
pub struct BrowserSession {
    options: SessionOptions,
}

impl BrowserSession {
    /// Create a new browser session.
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }

    /// Build a BrowserConfig with the given temp directory.
    fn build_browser_config(
        &self,
        temp_dir: &Path,
        chrome_exe: Option<&Path>,
    ) -> Result<BrowserConfig> {
        let mut config_builder = BrowserConfig::builder().user_data_dir(temp_dir);

        if let Some(exe) = chrome_exe {
            config_builder = config_builder.chrome_executable(exe);
        }

        if !self.options.headless {
            config_builder = config_builder.with_head();
        }

        if let Some(ref proxy) = self.options.proxy {
            config_builder = config_builder.arg(format!("--proxy-server={}", proxy));
        }

        if let Some(ref user_agent) = self.options.user_agent {
            config_builder = config_builder.arg(format!("--user-agent={}", user_agent));
        }

        config_builder = config_builder
            .no_sandbox()
            .arg("--disable-gpu")
            .viewport(None);

        config_builder
            .build()
            .map_err(|e| SpiderError::BrowserLaunch(format!("invalid browser config: {}", e)))
    }

    /// Launch a browser, with auto-download fallback if no Chrome is found.
    async fn launch_browser(
        &self,
        temp_dir: &Path,
    ) -> Result<(
        Browser,
        impl futures::Stream<Item = std::result::Result<(), chromiumoxide::error::CdpError>>,
    )> {
        // Resolve Chrome executable: explicit path > previously downloaded > system Chrome
        let chrome_exe = self
            .options
            .chrome_executable
            .clone()
            .or_else(crate::browser::resolve_chrome_executable);

        let launch_result = match self.build_browser_config(temp_dir, chrome_exe.as_deref()) {
            Ok(config) => Browser::launch(config).await,
            Err(e) => Err(chromiumoxide::error::CdpError::msg(e.to_string())),
        };

        match launch_result {
            Ok(pair) => Ok(pair),
            Err(e) => {
                // If we had an explicit or resolved chrome path, don't try auto-download
                if let Some(exe) = chrome_exe {
                    return Err(SpiderError::BrowserLaunch(format!(
                        "chrome at {:?} failed to start: {}",
                        exe, e
                    )));
                }

                warn!(
                    "Chrome not found, downloading Chromium automatically... (run `spidermap setup` to pre-install)"
                );
                let exe = crate::browser::download_chrome(false).await?;

                let config = self.build_browser_config(temp_dir, Some(&exe))?;
                Browser::launch(config).await.map_err(|e| {
                    SpiderError::BrowserLaunch(format!(
                        "chrome failed to start even after downloading Chromium: {}",
                        e
                    ))
                })
            }
        }
    }

    /// Load `url` in a fresh browser and capture every response into `store`.
    ///
    /// Returns once all body retrievals have settled. Browser start and
    /// navigation failures are fatal; everything else degrades.
    pub async fn capture(
        &self,
        url: &str,
        store: ResourceStore,
        fallback: Arc<dyn FallbackFetch>,
        hook: CaptureHook,
    ) -> Result<CaptureStats> {
        info!("Capturing with browser: {}", url);

        let instance_id = BROWSER_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "spidermap-browser-{}-{}",
            std::process::id(),
            instance_id
        ));

        if let Err(e) = std::fs::create_dir_all(&temp_dir) {
            debug!("Failed to create temp dir {:?}: {}", temp_dir, e);
        }

        let (browser, mut handler) = self.launch_browser(&temp_dir).await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self
            .capture_page(&browser, url, store, fallback, hook)
            .await;

        drop(browser);
        handler_task.abort();

        let temp_dir_for_cleanup = temp_dir.clone();
        tokio::spawn(async move {
            // Small delay to ensure browser has fully exited
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Err(e) = std::fs::remove_dir_all(&temp_dir_for_cleanup) {
                debug!("Failed to cleanup temp dir {:?}: {}", temp_dir_for_cleanup, e);
            }
        });

        result
    }

    async fn capture_page(
        &self,
        browser: &Browser,
        url: &str,
        store: ResourceStore,
        fallback: Arc<dyn FallbackFetch>,
        hook: CaptureHook,
    ) -> Result<CaptureStats> {
        let deadline = Instant::now() + Duration::from_secs(self.options.timeout_secs);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SpiderError::BrowserLaunch(format!("failed to create page: {}", e)))?;

        let mut response_events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| {
                SpiderError::BrowserLaunch(format!("failed to set up event listener: {}", e))
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = response_events.next().await {
                if tx.send(to_response_event(&event)).await.is_err() {
                    break;
                }
            }
        });

        let pipeline = CapturePipeline::new(
            store,
            Arc::new(PageBodySource::new(page.clone())),
            fallback,
        )
        .with_hook(hook)
        .with_body_timeout(Duration::from_secs(self.options.body_timeout_secs));
        let pipeline_task = tokio::spawn(pipeline.run(rx, deadline));

        let driven = self.drive_page(&page, url, deadline).await;

        // Closing the channel ends the pipeline loop; it then joins its tasks.
        forwarder.abort();
        let stats = match pipeline_task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Capture pipeline failed for {}: {}", url, e);
                CaptureStats::default()
            }
        };

        driven?;

        info!(
            "Captured {} resources from {} ({} duplicate notifications, {} via fallback)",
            stats.captured, url, stats.duplicates, stats.fallbacks
        );
        Ok(stats)
    }

    /// Apply headers and cookies, navigate, then scroll and wait.
    async fn drive_page(&self, page: &Page, url: &str, deadline: Instant) -> Result<()> {
        self.prepare_page(page, url).await;

        debug!("Navigating to: {}", url);
        match tokio::time::timeout_at(deadline, page.goto(url)).await {
            Ok(Ok(_)) => debug!("Navigation completed"),
            Ok(Err(e)) => {
                return Err(SpiderError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SpiderError::Navigation {
                    url: url.to_string(),
                    reason: "navigation timed out".to_string(),
                })
            }
        }

        if tokio::time::timeout_at(deadline, self.trigger_lazy_loading(page))
            .await
            .is_err()
        {
            warn!("Deadline reached while waiting on {}, continuing with captured content", url);
        }

        Ok(())
    }

    /// Extra headers and cookies must be in place before navigation.
    async fn prepare_page(&self, page: &Page, url: &str) {
        if !self.options.extra_headers.is_empty() {
            let headers = serde_json::to_value(&self.options.extra_headers).unwrap_or_default();
            if let Err(e) = page
                .execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
            {
                warn!("Failed to set extra headers: {}", e);
            }
        }

        if self.options.cookies.is_empty() {
            return;
        }

        let domain = match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
            Err(e) => {
                warn!("Cannot scope cookies, invalid URL {}: {}", url, e);
                return;
            }
        };

        let cookies: Vec<CookieParam> = self
            .options
            .cookies
            .iter()
            .map(|(name, value)| {
                let mut cookie = CookieParam::new(name.clone(), value.clone());
                cookie.domain = Some(domain.clone());
                cookie
            })
            .collect();

        if let Err(e) = page.execute(SetCookiesParams::new(cookies)).await {
            warn!("Failed to set cookies: {}", e);
        }
    }

    async fn trigger_lazy_loading(&self, page: &Page) {
        tokio::time::sleep(Duration::from_secs(self.options.initial_wait_secs)).await;

        debug!("Scrolling page to trigger lazy-loaded resources...");
        for (position, pause_secs) in SCROLL_STEPS {
            let script = format!("window.scrollTo(0, {})", position);
            if let Err(e) = page.evaluate(script).await {
                warn!("Scroll failed: {}", e);
                break;
            }
            tokio::time::sleep(Duration::from_secs(*pause_secs)).await;
        }

        debug!("Waiting {}s for asynchronous resources...", self.options.settle_secs);
        tokio::time::sleep(Duration::from_secs(self.options.settle_secs)).await;
    }
}

#[async_trait]
impl PageCapture for BrowserSession {
    async fn load_and_capture(
        &self,
        url: &str,
        store: ResourceStore,
        fallback: Arc<dyn FallbackFetch>,
        hook: CaptureHook,
    ) -> Result<CaptureStats> {
        self.capture(url, store, fallback, hook).await
    }
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}
