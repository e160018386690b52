//! Network response capture.
//!
//! This module turns the responses a rendered page produces into captured
//! resources:
//! - Browser session (headless Chrome via CDP) emitting response notifications
//! - Capture pipeline deduplicating by URL and retrieving bodies concurrently
//! - Fallback fetcher for bodies the browser cannot return

pub mod fallback;
pub mod pipeline;
pub mod session;

pub use fallback::{FallbackFetch, FallbackFetcher};
pub use pipeline::{
    log_capture_hook, BodySource, CaptureHook, CapturePipeline, CaptureStats, ResponseEvent,
};
pub use session::{BrowserSession, PageBodySource, PageCapture, SessionOptions};
