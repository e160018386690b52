//! Command-line configuration.

use crate::capture::SessionOptions;
use crate::sourcemap::{DEFAULT_MAP_RATE_LIMIT, DEFAULT_MAP_TIMEOUT_SECS};
use crate::types::{HttpConfig, Result, SpiderError};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Headless-browser resource capture with source map reconstruction.
#[derive(Parser, Debug, Clone)]
#[command(name = "spidermap")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render target pages, capture every response and rebuild sources from source maps
    Crawl(CrawlConfig),
    /// Download and set up a managed Chromium browser
    Setup(SetupConfig),
}

/// Configuration for the setup command.
#[derive(Parser, Debug, Clone)]
pub struct SetupConfig {
    /// Force re-download even if Chromium is already installed
    #[arg(long)]
    pub force: bool,
}

/// Configuration for the crawl command.
#[derive(Parser, Debug, Clone)]
pub struct CrawlConfig {
    /// Target URL(s) to crawl
    #[arg(required_unless_present = "file")]
    pub targets: Vec<String>,

    /// File containing URLs to crawl (one per line, `#` starts a comment)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Crawl timeout per target in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Cookies for the target, e.g. "session=abc; token=xyz"
    #[arg(long, env = "SPIDERMAP_COOKIE")]
    pub cookie: Option<String>,

    /// Extra request header as "Key:Value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// HTTP or SOCKS5 proxy, e.g. http://127.0.0.1:8080
    #[arg(long, env = "SPIDERMAP_PROXY")]
    pub proxy: Option<String>,

    /// Custom User-Agent string
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Number of targets to crawl in parallel
    #[arg(long, short = 'p', default_value = "1")]
    pub concurrency: usize,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Path to Chrome/Chromium executable (overrides auto-detection)
    #[arg(long, env = "SPIDERMAP_CHROME")]
    pub chrome_path: Option<PathBuf>,

    /// Output per-target summaries as JSON
    #[arg(long)]
    pub json: bool,

    /// Seconds to wait for late resources after scrolling
    #[arg(long, default_value = "5")]
    pub settle_secs: u64,

    /// Timeout in seconds for direct downloads of bodies the browser could not return
    #[arg(long, default_value = "10")]
    pub fallback_timeout: u64,

    /// Source map downloads per second
    #[arg(long, default_value = "10")]
    pub rate_limit: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            file: None,
            output: PathBuf::from("./output"),
            timeout: 30,
            cookie: None,
            headers: Vec::new(),
            proxy: None,
            user_agent: None,
            concurrency: 1,
            headed: false,
            chrome_path: None,
            json: false,
            settle_secs: 5,
            fallback_timeout: 10,
            rate_limit: DEFAULT_MAP_RATE_LIMIT,
        }
    }
}

impl CrawlConfig {
    /// Browser session options for one target.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout_secs: self.timeout,
            headless: !self.headed,
            chrome_executable: self.chrome_path.clone(),
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            extra_headers: self.header_map(),
            cookies: self.cookie.as_deref().map(parse_cookies).unwrap_or_default(),
            settle_secs: self.settle_secs,
            body_timeout_secs: self.fallback_timeout,
            ..SessionOptions::default()
        }
    }

    /// HTTP settings for fallback body downloads.
    pub fn fallback_http_config(&self) -> HttpConfig {
        self.http_config(self.fallback_timeout)
    }

    /// HTTP settings for source map downloads.
    pub fn map_http_config(&self) -> HttpConfig {
        self.http_config(DEFAULT_MAP_TIMEOUT_SECS)
    }

    fn http_config(&self, timeout_secs: u64) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            timeout_secs,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            proxy: self.proxy.clone(),
        }
    }

    /// Parsed `-H` headers. Malformed entries are skipped with a warning.
    pub fn header_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|raw| {
                let parsed = parse_header(raw);
                if parsed.is_none() {
                    warn!("Ignoring malformed header {:?} (expected Key:Value)", raw);
                }
                parsed
            })
            .collect()
    }

    /// Load targets from the command line and the optional file.
    pub fn load_targets(&self) -> Result<Vec<String>> {
        let mut targets = self.targets.clone();

        if let Some(ref file_path) = self.file {
            let content = std::fs::read_to_string(file_path)?;
            for line in content.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    targets.push(trimmed.to_string());
                }
            }
        }

        let normalized: Vec<String> = targets
            .into_iter()
            .map(|t| {
                if !t.starts_with("http://") && !t.starts_with("https://") {
                    format!("https://{}", t)
                } else {
                    t
                }
            })
            .collect();

        if normalized.is_empty() {
            return Err(SpiderError::ConfigError("no valid target URLs".to_string()));
        }

        Ok(normalized)
    }
}

/// Split `Key:Value` on the first colon. Both sides are trimmed; the key
/// must be non-empty.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Parse `"a=1; b=2"` into `(name, value)` pairs.
///
/// Pairs without `=` or with an empty name are dropped.
pub fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
