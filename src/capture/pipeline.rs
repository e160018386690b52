//! Response capture pipeline.
//!
//! Turns a stream of response-received notifications into fully populated
//! [`Resource`] entries in a [`ResourceStore`]. Every body retrieval runs in
//! its own task tracked by a [`JoinSet`], so the caller knows exactly when all
//! captures for a target have settled.

use crate::capture::fallback::FallbackFetch;
use crate::store::ResourceStore;
use crate::types::{Resource, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A response-received notification, as delivered by the browser.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    /// Browser-side request identifier. Authoritative for body retrieval.
    pub request_id: String,
    pub url: String,
    pub status_code: i64,
    pub mime_type: String,
    pub headers: HashMap<String, String>,
}

/// On-demand body retrieval keyed by request identifier.
#[async_trait]
pub trait BodySource: Send + Sync {
    /// Fetch the body of a previously observed response.
    ///
    /// Fails when the request is no longer resolvable (evicted, 304, ...).
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>>;
}

/// Called once for every resource written to the store.
pub type CaptureHook = Arc<dyn Fn(&Resource) + Send + Sync>;

/// Default hook: one structured debug line per capture.
pub fn log_capture_hook() -> CaptureHook {
    Arc::new(|resource: &Resource| {
        debug!(
            url = %resource.url,
            mime = %resource.mime_type,
            bytes = resource.content.len(),
            "Captured resource"
        );
    })
}

/// Counters for one capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Notifications received.
    pub observed: usize,
    /// Notifications dropped because the URL was already reserved.
    pub duplicates: usize,
    /// Resources written to the store.
    pub captured: usize,
    /// Captures whose body came from the fallback fetcher (or was lost).
    pub fallbacks: usize,
}

/// Result of one body task.
struct TaskOutcome {
    used_fallback: bool,
}

/// Consumes [`ResponseEvent`]s and fills a [`ResourceStore`].
pub struct CapturePipeline {
    store: ResourceStore,
    bodies: Arc<dyn BodySource>,
    fallback: Arc<dyn FallbackFetch>,
    hook: CaptureHook,
    body_timeout: Duration,
    tasks: JoinSet<TaskOutcome>,
    stats: CaptureStats,
}

impl CapturePipeline {
    /// Create a pipeline writing into `store`.
    pub fn new(
        store: ResourceStore,
        bodies: Arc<dyn BodySource>,
        fallback: Arc<dyn FallbackFetch>,
    ) -> Self {
        Self {
            store,
            bodies,
            fallback,
            hook: log_capture_hook(),
            body_timeout: Duration::from_secs(10),
            tasks: JoinSet::new(),
            stats: CaptureStats::default(),
        }
    }

    /// Replace the per-capture hook.
    pub fn with_hook(mut self, hook: CaptureHook) -> Self {
        self.hook = hook;
        self
    }

    /// Bound each browser-side body retrieval.
    pub fn with_body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = timeout;
        self
    }

    /// Handle one notification. Returns `true` if a body task was started.
    pub fn on_response_received(&mut self, event: ResponseEvent) -> bool {
        self.stats.observed += 1;

        if !self.store.try_reserve(&event.url) {
            trace!("Already reserved: {}", event.url);
            self.stats.duplicates += 1;
            return false;
        }

        let resource = Resource {
            url: event.url,
            method: None,
            status_code: event.status_code,
            mime_type: event.mime_type,
            content: Vec::new(),
            headers: event.headers,
            response_time: Utc::now(),
        };

        let store = self.store.clone();
        let bodies = self.bodies.clone();
        let fallback = self.fallback.clone();
        let hook = self.hook.clone();
        let body_timeout = self.body_timeout;
        let request_id = event.request_id;

        self.tasks.spawn(async move {
            let mut resource = resource;
            let mut used_fallback = false;

            let body = tokio::time::timeout(body_timeout, bodies.response_body(&request_id)).await;
            resource.content = match body {
                Ok(Ok(content)) => content,
                Ok(Err(e)) => {
                    debug!("Body unavailable for {} ({}), falling back", resource.url, e);
                    used_fallback = true;
                    fallback.fetch(&resource.url).await.unwrap_or_default()
                }
                Err(_) => {
                    debug!("Body retrieval timed out for {}, falling back", resource.url);
                    used_fallback = true;
                    fallback.fetch(&resource.url).await.unwrap_or_default()
                }
            };

            hook(&resource);
            let url = resource.url.clone();
            store.put(&url, resource);

            TaskOutcome { used_fallback }
        });

        true
    }

    /// Consume events until the channel closes or `deadline` passes, then
    /// stop accepting reservations and wait for every in-flight task.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ResponseEvent>,
        deadline: Instant,
    ) -> CaptureStats {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        self.on_response_received(event);
                    }
                    None => {
                        trace!("Event channel closed");
                        break;
                    }
                },
                _ = &mut sleep => {
                    debug!("Capture deadline reached with {} tasks in flight", self.tasks.len());
                    break;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.record(joined);
                }
            }
        }

        self.store.close();
        drop(events);
        self.settle().await
    }

    /// Wait for every in-flight body task and return the final counters.
    pub async fn settle(mut self) -> CaptureStats {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined);
        }
        self.stats
    }

    fn record(&mut self, joined: std::result::Result<TaskOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => {
                self.stats.captured += 1;
                if outcome.used_fallback {
                    self.stats.fallbacks += 1;
                }
            }
            Err(e) => warn!("Capture task failed: {}", e),
        }
    }
}
