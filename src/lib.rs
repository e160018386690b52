//! spidermap - headless-browser resource capture with source map reconstruction.
//!
//! Renders a page in Chromium and captures every network response exactly
//! once per URL, then follows `sourceMappingURL` references in the captured
//! JavaScript and CSS to rebuild the original pre-build source tree:
//! - Response capture over the Chrome DevTools Protocol with a concurrent,
//!   deduplicating pipeline and a direct HTTP fallback for lost bodies
//! - Source map resolution, download and reconstruction of embedded sources
//! - On-disk mirror of everything captured, plus a report
//!
//! # Example
//!
//! ```no_run
//! use spidermap::config::CrawlConfig;
//! use spidermap::console::ConsoleOutput;
//! use spidermap::spider::Spider;
//!
//! #[tokio::main]
//! async fn main() {
//!     let spider = Spider::new(CrawlConfig::default(), ConsoleOutput::default()).unwrap();
//!     let outcome = spider.crawl("https://example.com").await.unwrap();
//!     println!(
//!         "Captured {} resources, rebuilt {} source files",
//!         outcome.captured_count, outcome.source_files_count
//!     );
//! }
//! ```

pub mod capture;
pub mod config;
pub mod console;
pub mod sourcemap;
pub mod spider;
pub mod storage;
pub mod store;
pub mod types;

pub mod browser;

pub use config::{Commands, Config, CrawlConfig, SetupConfig};
pub use spider::{CrawlOutcome, Spider};
pub use store::ResourceStore;
pub use types::{CrawlSummary, HttpConfig, Resource, Result, SpiderError};
