//! Crawl orchestration: capture a target, reconstruct sources, persist.

use crate::capture::{
    log_capture_hook, BrowserSession, CaptureHook, CaptureStats, FallbackFetch, FallbackFetcher,
    PageCapture,
};
use crate::config::CrawlConfig;
use crate::console::ConsoleOutput;
use crate::sourcemap::SourceMapExtractor;
use crate::storage::Storage;
use crate::store::ResourceStore;
use crate::types::{CrawlSummary, Resource, Result, SpiderError};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resources run through the extractor at the same time.
const EXTRACTION_CONCURRENCY: usize = 16;

/// Everything one crawl produced, before persistence.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub target: String,
    /// Captured and reconstructed resources, keyed by URL.
    pub resources: HashMap<String, Resource>,
    pub stats: CaptureStats,
    /// Resources captured from the network.
    pub captured_count: usize,
    /// Distinct source files reconstructed from source maps.
    pub source_files_count: usize,
    pub duration_secs: f64,
}

/// Drives capture, extraction and storage for one or many targets.
pub struct Spider {
    config: CrawlConfig,
    capture: Arc<dyn PageCapture>,
    fallback: Arc<dyn FallbackFetch>,
    extractor: SourceMapExtractor,
    hook: CaptureHook,
    console: ConsoleOutput,
    launch_help_shown: AtomicBool,
}

impl Spider {
    /// Spider backed by a real browser and HTTP clients built from `config`.
    pub fn new(config: CrawlConfig, console: ConsoleOutput) -> Result<Self> {
        let capture = Arc::new(BrowserSession::new(config.session_options()));
        let fallback = Arc::new(FallbackFetcher::new(&config.fallback_http_config())?);
        let extractor = SourceMapExtractor::http(&config.map_http_config(), config.rate_limit)?;

        Ok(Self::with_components(config, capture, fallback, extractor, console))
    }

    /// Spider with explicit collaborators.
    pub fn with_components(
        config: CrawlConfig,
        capture: Arc<dyn PageCapture>,
        fallback: Arc<dyn FallbackFetch>,
        extractor: SourceMapExtractor,
        console: ConsoleOutput,
    ) -> Self {
        Self {
            config,
            capture,
            fallback,
            extractor,
            hook: log_capture_hook(),
            console,
            launch_help_shown: AtomicBool::new(false),
        }
    }

    /// Replace the per-capture hook.
    pub fn with_hook(mut self, hook: CaptureHook) -> Self {
        self.hook = hook;
        self
    }

    /// Capture `target` and reconstruct sources from its source maps.
    ///
    /// Fails only when the page could not be loaded.
    pub async fn crawl(&self, target: &str) -> Result<CrawlOutcome> {
        let start_time = Instant::now();
        let store = ResourceStore::new();

        self.console.print_progress("Launching browser...");
        let stats = self
            .capture
            .load_and_capture(target, store.clone(), self.fallback.clone(), self.hook.clone())
            .await?;

        let captured = store.snapshot();
        let captured_count = captured.len();
        self.console
            .print_progress(&format!("Captured {} resources, scanning for source maps...", captured_count));

        let sources = extract_sources(&self.extractor, &captured).await;
        let source_files_count = sources.iter().map(|r| r.url.as_str()).collect::<HashSet<_>>().len();
        info!(
            "Reconstructed {} source files for {}",
            source_files_count, target
        );

        store.extend(sources);
        let resources = store.snapshot();

        Ok(CrawlOutcome {
            target: target.to_string(),
            resources,
            stats,
            captured_count,
            source_files_count,
            duration_secs: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Crawl `target` and write its resources and report below `output_dir`.
    pub async fn crawl_and_save(&self, target: &str, output_dir: &Path) -> Result<CrawlSummary> {
        let outcome = self.crawl(target).await?;

        let storage = Storage::new(output_dir);
        let written = storage.save(&outcome.resources).await?;
        debug!("Wrote {} files to {}", written, output_dir.display());

        if let Err(e) = storage.generate_report(&outcome.resources).await {
            warn!("Failed to write report for {}: {}", target, e);
        }

        Ok(CrawlSummary {
            target: outcome.target,
            output_dir: output_dir.display().to_string(),
            captured_count: outcome.captured_count,
            source_files_count: outcome.source_files_count,
            total_count: outcome.resources.len(),
            duration_secs: outcome.duration_secs,
            error: None,
        })
    }

    /// Crawl every target, at most `concurrency` at a time.
    ///
    /// A single target is written straight into the output directory; in a
    /// batch, target `n` (1-based, input order) goes to `output/url_<n>`.
    /// Summaries come back in input order.
    pub async fn crawl_multiple(&self, targets: Vec<String>) -> Vec<CrawlSummary> {
        let concurrency = self.config.concurrency.max(1);
        let total = targets.len();
        let batch = total > 1;

        let pb = if batch {
            self.console.create_progress_bar(total as u64, "Crawling")
        } else {
            None
        };

        let mut indexed: Vec<(usize, CrawlSummary)> = stream::iter(targets.into_iter().enumerate())
            .map(|(idx, target)| {
                let pb = pb.clone();
                async move {
                    let output_dir = self.output_dir_for(idx, batch);
                    let summary = self.crawl_one(idx, total, &target, &output_dir).await;
                    if let Some(ref pb) = pb {
                        pb.inc(1);
                    }
                    (idx, summary)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        let summaries: Vec<CrawlSummary> = indexed.into_iter().map(|(_, s)| s).collect();

        if batch {
            let failed = summaries.iter().filter(|s| s.error.is_some()).count();
            info!(
                "Batch complete: {} succeeded, {} failed, {} total",
                total - failed,
                failed,
                total
            );
            self.console.print_batch_totals(total - failed, failed);
        }

        summaries
    }

    async fn crawl_one(&self, idx: usize, total: usize, target: &str, output_dir: &Path) -> CrawlSummary {
        let start_time = Instant::now();
        self.console.print_crawl_start(target);
        debug!("[{}/{}] Starting: {}", idx + 1, total, target);

        match self.crawl_and_save(target, output_dir).await {
            Ok(summary) => {
                debug!("[{}/{}] Done: {}", idx + 1, total, target);
                summary
            }
            Err(e) => {
                warn!("[{}/{}] Failed: {} - {}", idx + 1, total, target, e);
                if matches!(e, SpiderError::BrowserLaunch(_))
                    && !self.launch_help_shown.swap(true, Ordering::SeqCst)
                {
                    self.console.print_launch_help(&e.to_string());
                }
                CrawlSummary {
                    target: target.to_string(),
                    output_dir: output_dir.display().to_string(),
                    captured_count: 0,
                    source_files_count: 0,
                    total_count: 0,
                    duration_secs: start_time.elapsed().as_secs_f64(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn output_dir_for(&self, idx: usize, batch: bool) -> PathBuf {
        if batch {
            self.config.output.join(format!("url_{}", idx + 1))
        } else {
            self.config.output.clone()
        }
    }
}

/// Run every captured resource through the extractor concurrently.
///
/// Resolution errors are logged and skipped; one resource never affects
/// another.
pub async fn extract_sources(
    extractor: &SourceMapExtractor,
    resources: &HashMap<String, Resource>,
) -> Vec<Resource> {
    let batches: Vec<Vec<Resource>> = stream::iter(resources.values())
        .map(|resource| async move {
            match extractor.extract_from_resource(resource).await {
                Ok(sources) => sources,
                Err(e) => {
                    warn!("Failed to resolve source map for {}: {}", resource.url, e);
                    Vec::new()
                }
            }
        })
        .buffer_unordered(EXTRACTION_CONCURRENCY)
        .collect()
        .await;

    batches.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::MapFetcher;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Pretends to load a page: every target gets an HTML document and a
    /// script referencing a source map. Targets containing "fail" error out.
    struct FakeCapture {
        loads: AtomicUsize,
    }

    impl FakeCapture {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
            }
        }
    }

    fn resource(url: &str, mime: &str, content: &str) -> Resource {
        Resource {
            url: url.to_string(),
            method: None,
            status_code: 200,
            mime_type: mime.to_string(),
            content: content.as_bytes().to_vec(),
            headers: HashMap::new(),
            response_time: Utc::now(),
        }
    }

    #[async_trait]
    impl PageCapture for FakeCapture {
        async fn load_and_capture(
            &self,
            url: &str,
            store: ResourceStore,
            _fallback: Arc<dyn FallbackFetch>,
            hook: CaptureHook,
        ) -> Result<CaptureStats> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if url.contains("fail") {
                return Err(SpiderError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                });
            }

            let page = resource(url, "text/html", "<script src=\"/app.js\"></script>");
            let script = resource(
                &format!("{}/app.js", url.trim_end_matches('/')),
                "application/javascript",
                "run();\n//# sourceMappingURL=app.js.map",
            );
            for res in [page, script] {
                assert!(store.try_reserve(&res.url));
                hook(&res);
                store.put(&res.url.clone(), res);
            }
            store.close();

            Ok(CaptureStats {
                observed: 2,
                duplicates: 0,
                captured: 2,
                fallbacks: 0,
            })
        }
    }

    struct NoFallback;

    #[async_trait]
    impl FallbackFetch for NoFallback {
        async fn fetch(&self, _url: &str) -> Option<Vec<u8>> {
            None
        }
    }

    struct StaticMaps;

    #[async_trait]
    impl MapFetcher for StaticMaps {
        async fn fetch_map(&self, url: &str) -> Result<Vec<u8>> {
            if !url.ends_with("/app.js.map") {
                return Err(SpiderError::SourceMapDownload {
                    url: url.to_string(),
                    reason: "HTTP 404".to_string(),
                });
            }
            Ok(br#"{"version":3,"sources":["webpack:///./src/App.js","webpack:///./src/util.ts"],
                "sourcesContent":["export default 1;","export const x = 2;"]}"#
                .to_vec())
        }
    }

    fn spider(output: &Path, concurrency: usize) -> (Spider, Arc<FakeCapture>) {
        let capture = Arc::new(FakeCapture::new());
        let config = CrawlConfig {
            output: output.to_path_buf(),
            concurrency,
            ..CrawlConfig::default()
        };
        let spider = Spider::with_components(
            config,
            capture.clone(),
            Arc::new(NoFallback),
            SourceMapExtractor::new(Arc::new(StaticMaps)),
            ConsoleOutput::new(false, true),
        );
        (spider, capture)
    }

    #[tokio::test]
    async fn test_crawl_merges_reconstructed_sources() {
        let dir = TempDir::new().unwrap();
        let (spider, _) = spider(dir.path(), 1);

        let outcome = spider.crawl("https://example.com").await.unwrap();
        assert_eq!(outcome.captured_count, 2);
        assert_eq!(outcome.source_files_count, 2);
        assert_eq!(outcome.resources.len(), 4);
        assert_eq!(outcome.stats.captured, 2);

        let app = &outcome.resources["https://example.com/src/App.js"];
        assert!(app.is_source_map_derived());
        assert_eq!(app.text(), "export default 1;");
        assert_eq!(
            outcome.resources["https://example.com/src/util.ts"].mime_type,
            "application/typescript"
        );
    }

    #[tokio::test]
    async fn test_crawl_hook_sees_captures() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (spider, _) = spider(dir.path(), 1);
        let spider = spider.with_hook(Arc::new(move |_res: &Resource| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        spider.crawl("https://example.com").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_crawl_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (spider, _) = spider(dir.path(), 1);

        let err = spider.crawl("https://fail.example.com").await.unwrap_err();
        assert!(matches!(err, SpiderError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_single_target_writes_into_output_dir() {
        let dir = TempDir::new().unwrap();
        let (spider, _) = spider(dir.path(), 1);

        let summaries = spider.crawl_multiple(vec!["https://example.com".to_string()]).await;
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].error.is_none());
        assert_eq!(summaries[0].total_count, 4);

        let host = dir.path().join("example.com");
        assert!(host.join("index.html").exists());
        assert!(host.join("app.js").exists());
        assert!(host.join("src/App.js").exists());
        assert!(dir.path().join("report.txt").exists());
        assert!(dir.path().join("report.json").exists());
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let (spider, capture) = spider(dir.path(), 2);
        let targets = vec![
            "https://one.example.com".to_string(),
            "https://fail.example.com".to_string(),
            "https://three.example.com".to_string(),
        ];

        let summaries = spider.crawl_multiple(targets.clone()).await;
        assert_eq!(capture.loads.load(Ordering::SeqCst), 3);

        let order: Vec<_> = summaries.iter().map(|s| s.target.clone()).collect();
        assert_eq!(order, targets);
        assert!(summaries[0].error.is_none());
        assert!(summaries[1].error.is_some());
        assert!(summaries[2].error.is_none());

        assert!(dir.path().join("url_1/one.example.com/src/App.js").exists());
        assert!(!dir.path().join("url_2").exists());
        assert!(dir.path().join("url_3/three.example.com/app.js").exists());
        assert_eq!(summaries[2].output_dir, dir.path().join("url_3").display().to_string());
    }

    #[tokio::test]
    async fn test_extract_sources_skips_unrelated_resources() {
        let extractor = SourceMapExtractor::new(Arc::new(StaticMaps));
        let resources: HashMap<String, Resource> = [
            resource("https://example.com/logo.png", "image/png", "\u{89}PNG"),
            resource(
                "https://example.com/vendor.js",
                "application/javascript",
                "//# sourceMappingURL=vendor.js.map",
            ),
            resource(
                "https://example.com/app.js",
                "application/javascript",
                "//# sourceMappingURL=app.js.map",
            ),
        ]
        .into_iter()
        .map(|r| (r.url.clone(), r))
        .collect();

        let sources = extract_sources(&extractor, &resources).await;
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(Resource::is_source_map_derived));
    }
}
