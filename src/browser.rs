//! Managed Chromium installation used when no system browser is available.

use crate::types::{Result, SpiderError};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File names recognized as a Chrome/Chromium executable.
const EXECUTABLE_NAMES: &[&str] = &[
    "chrome",
    "chromium",
    "Chromium",
    "Google Chrome",
    "chrome.exe",
    "chromium.exe",
];

/// Binary inside a macOS app bundle.
const MAC_BUNDLE_BINARY: &str = "Contents/MacOS/Chromium";

/// `~/.spidermap/chrome`
pub fn managed_chrome_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpiderError::ConfigError("Could not determine home directory".to_string()))?;
    Ok(home.join(".spidermap").join("chrome"))
}

/// Previously downloaded executable in the managed directory, if any.
pub fn resolve_chrome_executable() -> Option<PathBuf> {
    let chrome_dir = managed_chrome_dir().ok()?;
    find_chrome_in_dir(&chrome_dir)
}

/// Download Chromium into the managed directory and return the executable.
///
/// Without `force`, an existing installation is reused.
pub async fn download_chrome(force: bool) -> Result<PathBuf> {
    let chrome_dir = managed_chrome_dir()?;

    if !force {
        if let Some(exe) = find_chrome_in_dir(&chrome_dir) {
            info!("Chrome already installed at {:?}", exe);
            return Ok(exe);
        }
    }

    if force && chrome_dir.exists() {
        info!("Removing existing Chrome installation for re-download...");
        tokio::fs::remove_dir_all(&chrome_dir).await?;
    }
    tokio::fs::create_dir_all(&chrome_dir).await?;

    info!("Downloading Chromium to {:?}...", chrome_dir);
    let options = BrowserFetcherOptions::builder()
        .with_path(&chrome_dir)
        .build()
        .map_err(|e| SpiderError::ConfigError(format!("Failed to configure browser fetcher: {}", e)))?;

    let installation = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| SpiderError::BrowserLaunch(format!("Failed to download Chromium: {}", e)))?;

    info!("Chromium downloaded to {:?}", installation.executable_path);
    Ok(installation.executable_path)
}

/// Depth-first search of `dir` for a browser executable.
fn find_chrome_in_dir(dir: &Path) -> Option<PathBuf> {
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.ends_with(".app") {
                let inner = path.join(MAC_BUNDLE_BINARY);
                if inner.is_file() {
                    return Some(inner);
                }
            } else if EXECUTABLE_NAMES.contains(&name.as_ref()) && path.is_file() {
                debug!("Found browser executable at {:?}", path);
                return Some(path);
            }

            if path.is_dir() {
                pending.push(path);
            }
        }
    }

    None
}
