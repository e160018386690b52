//! On-disk persistence of captured resources and the crawl report.
//!
//! Layout: `<base_dir>/<host>/<path>` per resource, plus `report.txt` and
//! `report.json` at the top of `base_dir`.

use crate::types::{Resource, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Query strings are cut to this many characters in file names.
const MAX_QUERY_LEN: usize = 50;

/// Characters replaced by `_` when a query string becomes part of a file name.
const UNSAFE_QUERY_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '&', '='];

pub const REPORT_TXT: &str = "report.txt";
pub const REPORT_JSON: &str = "report.json";

/// Writes resources below a base directory.
#[derive(Debug, Clone)]
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write every resource with non-empty content. Returns the number of
    /// files written.
    ///
    /// Only failure to create the base directory is an error; individual
    /// write failures are logged and skipped.
    pub async fn save(&self, resources: &HashMap<String, Resource>) -> Result<usize> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let mut written = 0;
        for resource in resources.values() {
            if resource.content.is_empty() {
                continue;
            }

            match self.save_resource(resource).await {
                Ok(path) => {
                    debug!("Saved {} -> {}", resource.url, path.display());
                    written += 1;
                }
                Err(e) => warn!("Failed to save {}: {}", resource.url, e),
            }
        }

        Ok(written)
    }

    async fn save_resource(&self, resource: &Resource) -> Result<PathBuf> {
        let path = self.file_path_for(&resource.url)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &resource.content).await?;
        Ok(path)
    }

    /// Map a resource URL to its file path under the base directory.
    pub fn file_path_for(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)?;

        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) if !host.is_empty() => format!("{}_{port}", host.replace(':', "_")),
            (Some(host), None) if !host.is_empty() => host.replace(':', "_"),
            _ => "unknown".to_string(),
        };

        let raw_path = match parsed.path() {
            "" | "/" => "/index.html",
            other => other,
        };
        let cleaned = path_clean::clean(raw_path).to_string_lossy().replace("..", "");
        let mut path = cleaned.trim_start_matches('/').to_string();

        if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
            let query: String = sanitize_query(query).chars().take(MAX_QUERY_LEN).collect();
            path.push('_');
            path.push_str(&query);
        }

        if path.is_empty() || path.ends_with('/') {
            path.push_str("index.html");
        }

        let host_dir = self.base_dir.join(&host);
        let mut full = host_dir.join(&path);
        if !path_clean::clean(&full).starts_with(path_clean::clean(&self.base_dir)) {
            let file_name = Path::new(&path)
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "index.html".into());
            full = host_dir.join(file_name);
        }

        if full.extension().is_none() {
            let mut with_ext = full.into_os_string();
            with_ext.push(".html");
            full = PathBuf::from(with_ext);
        }

        Ok(full)
    }

    /// Write `report.txt` and `report.json` describing `resources`.
    pub async fn generate_report(&self, resources: &HashMap<String, Resource>) -> Result<CrawlReport> {
        let report = CrawlReport::build(resources);

        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::write(self.base_dir.join(REPORT_TXT), report.render_text()).await?;
        tokio::fs::write(self.base_dir.join(REPORT_JSON), serde_json::to_vec_pretty(&report)?).await?;

        Ok(report)
    }
}

fn sanitize_query(query: &str) -> String {
    query.replace(UNSAFE_QUERY_CHARS, "_")
}

/// Summary of a crawl as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    /// Counts by MIME type without parameters.
    pub by_type: BTreeMap<String, usize>,
    /// Sorted by URL.
    pub resources: Vec<ReportEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub url: String,
    pub status_code: i64,
    pub mime_type: String,
    pub size: usize,
    pub sha256: String,
    pub from_source_map: bool,
}

impl CrawlReport {
    pub fn build(resources: &HashMap<String, Resource>) -> Self {
        let mut by_type = BTreeMap::new();
        for resource in resources.values() {
            *by_type.entry(simplify_mime(&resource.mime_type)).or_insert(0) += 1;
        }

        let mut entries: Vec<ReportEntry> = resources
            .values()
            .map(|resource| ReportEntry {
                url: resource.url.clone(),
                status_code: resource.status_code,
                mime_type: resource.mime_type.clone(),
                size: resource.content.len(),
                sha256: hash_content(&resource.content),
                from_source_map: resource.is_source_map_derived(),
            })
            .collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));

        Self {
            generated_at: Utc::now(),
            total: resources.len(),
            by_type,
            resources: entries,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Spidermap Crawl Report");
        let _ = writeln!(out, "======================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out, "Total Resources: {}", self.total);
        let _ = writeln!(out);

        let _ = writeln!(out, "Resources by Type:");
        for (mime, count) in &self.by_type {
            let _ = writeln!(out, "  {mime}: {count}");
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Detailed Resource List:");
        let _ = writeln!(out, "----------------------");
        for entry in &self.resources {
            let _ = writeln!(out);
            let _ = writeln!(out, "URL: {}", entry.url);
            let _ = writeln!(out, "  Status: {}", entry.status_code);
            let _ = writeln!(out, "  Type: {}", entry.mime_type);
            let _ = writeln!(out, "  Size: {} bytes", entry.size);
            let _ = writeln!(out, "  SHA-256: {}", entry.sha256);
            if entry.from_source_map {
                let _ = writeln!(out, "  Origin: source map");
            }
        }

        out
    }
}

/// MIME type without parameters; `unknown` when empty.
fn simplify_mime(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or_default().trim();
    if base.is_empty() {
        "unknown".to_string()
    } else {
        base.to_string()
    }
}

fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SOURCE_MARKER_HEADER, SOURCE_MARKER_VALUE};
    use tempfile::TempDir;

    fn resource(url: &str, mime: &str, content: &[u8]) -> Resource {
        Resource {
            url: url.to_string(),
            method: None,
            status_code: 200,
            mime_type: mime.to_string(),
            content: content.to_vec(),
            headers: HashMap::new(),
            response_time: Utc::now(),
        }
    }

    fn store_of(resources: Vec<Resource>) -> HashMap<String, Resource> {
        resources.into_iter().map(|r| (r.url.clone(), r)).collect()
    }

    #[test]
    fn test_file_path_rules() {
        let storage = Storage::new("/out");
        let cases = [
            ("https://example.com", "/out/example.com/index.html"),
            ("https://example.com/", "/out/example.com/index.html"),
            ("https://example.com/static/js/app.js", "/out/example.com/static/js/app.js"),
            ("http://localhost:8080/main.css", "/out/localhost_8080/main.css"),
            ("https://example.com/about", "/out/example.com/about.html"),
            ("https://example.com/docs/", "/out/example.com/docs.html"),
            ("https://example.com/api/data?id=1&x=2", "/out/example.com/api/data_id_1_x_2.html"),
            ("https://example.com/app.js?v=1.2", "/out/example.com/app.js_v_1.2"),
            ("https://example.com/a/../../etc/passwd", "/out/example.com/etc/passwd.html"),
        ];

        for (url, expected) in cases {
            assert_eq!(storage.file_path_for(url).unwrap(), PathBuf::from(expected), "{url}");
        }
    }

    #[test]
    fn test_long_query_is_truncated() {
        let storage = Storage::new("/out");
        let query = "q=".to_string() + &"a".repeat(100);
        let path = storage
            .file_path_for(&format!("https://example.com/search.json?{query}"))
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("search.json_q_{}", "a".repeat(48)));
    }

    #[test]
    fn test_hostless_url_goes_to_unknown() {
        let storage = Storage::new("/out");
        let path = storage.file_path_for("data:text/plain,hello").unwrap();
        assert!(path.starts_with("/out/unknown"));
    }

    #[test]
    fn test_invalid_url_is_an_error() {
        assert!(Storage::new("/out").file_path_for("not a url").is_err());
    }

    #[tokio::test]
    async fn test_save_skips_empty_content() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("site"));
        let resources = store_of(vec![
            resource("https://example.com/", "text/html", b"<html></html>"),
            resource("https://example.com/app.js", "application/javascript", b"run()"),
            resource("https://example.com/empty.css", "text/css", b""),
        ]);

        let written = storage.save(&resources).await.unwrap();
        assert_eq!(written, 2);

        let base = dir.path().join("site").join("example.com");
        assert_eq!(std::fs::read(base.join("index.html")).unwrap(), b"<html></html>");
        assert_eq!(std::fs::read(base.join("app.js")).unwrap(), b"run()");
        assert!(!base.join("empty.css").exists());
    }

    #[tokio::test]
    async fn test_save_continues_past_bad_urls() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let resources = store_of(vec![
            resource("::bad::", "text/plain", b"x"),
            resource("https://example.com/ok.txt", "text/plain", b"ok"),
        ]);

        assert_eq!(storage.save(&resources).await.unwrap(), 1);
        assert!(dir.path().join("example.com/ok.txt").exists());
    }

    #[tokio::test]
    async fn test_generate_report() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        let mut derived = resource("https://example.com/src/App.js", "application/javascript", b"app");
        derived
            .headers
            .insert(SOURCE_MARKER_HEADER.to_string(), SOURCE_MARKER_VALUE.to_string());
        let resources = store_of(vec![
            resource("https://example.com/z.css", "text/css; charset=utf-8", b"body{}"),
            resource("https://example.com/a.js", "application/javascript", b"run()"),
            resource("https://example.com/blob", "", b""),
            derived,
        ]);

        let report = storage.generate_report(&resources).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.by_type.get("application/javascript"), Some(&2));
        assert_eq!(report.by_type.get("text/css"), Some(&1));
        assert_eq!(report.by_type.get("unknown"), Some(&1));

        let urls: Vec<_> = report.resources.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/a.js",
                "https://example.com/blob",
                "https://example.com/src/App.js",
                "https://example.com/z.css",
            ]
        );
        assert_eq!(report.resources[0].sha256, hash_content(b"run()"));
        assert!(report.resources[2].from_source_map);

        let text = std::fs::read_to_string(dir.path().join(REPORT_TXT)).unwrap();
        assert!(text.contains("Total Resources: 4"));
        assert!(text.contains("  text/css: 1"));
        assert!(text.contains("URL: https://example.com/a.js\n  Status: 200"));
        assert!(text.contains("  Size: 6 bytes"));
        assert!(text.contains("  Origin: source map"));
        assert!(text.find("a.js").unwrap() < text.find("z.css").unwrap());

        let json = std::fs::read(dir.path().join(REPORT_JSON)).unwrap();
        let parsed: CrawlReport = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.total, 4);
        assert_eq!(parsed.resources.len(), 4);
    }

    #[test]
    fn test_hash_content() {
        assert_eq!(
            hash_content(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
