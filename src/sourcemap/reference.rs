//! Detection and resolution of `sourceMappingURL` references.
//!
//! Two grammars are recognized, checked in order:
//! - line form: `//# sourceMappingURL=<value>` (value runs to end of line)
//! - block form: `/*# sourceMappingURL=<value>*/` (value runs to the closing `*/`
//!   on the same line)
//!
//! Values are trimmed. When a form occurs several times the first non-empty
//! occurrence wins.

use crate::types::Result;
use url::Url;

const LINE_MARKER: &str = "//# sourceMappingURL=";
const BLOCK_MARKER: &str = "/*# sourceMappingURL=";
const BLOCK_END: &str = "*/";

/// Where the source map document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapLocation {
    /// Absolute URL to download.
    Remote(String),
    /// Inline `data:` URL carrying the document itself.
    Inline(String),
}

impl MapLocation {
    /// The URL or data URL, for logging.
    pub fn as_str(&self) -> &str {
        match self {
            MapLocation::Remote(url) | MapLocation::Inline(url) => url,
        }
    }
}

/// Find the source map reference in JS/CSS text, if any.
pub fn find_reference(content: &str) -> Option<&str> {
    find_line_form(content).or_else(|| find_block_form(content))
}

fn find_line_form(content: &str) -> Option<&str> {
    content.match_indices(LINE_MARKER).find_map(|(idx, _)| {
        let rest = &content[idx + LINE_MARKER.len()..];
        let line = rest.split('\n').next().unwrap_or(rest);
        non_empty(line.trim())
    })
}

fn find_block_form(content: &str) -> Option<&str> {
    content.match_indices(BLOCK_MARKER).find_map(|(idx, _)| {
        let rest = &content[idx + BLOCK_MARKER.len()..];
        let line = rest.split('\n').next().unwrap_or(rest);
        let end = line.find(BLOCK_END)?;
        non_empty(line[..end].trim())
    })
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Resolve a reference found in the resource at `resource_url`.
///
/// `http://` and `https://` values are used verbatim; `data:` values are
/// inline documents; anything else is an RFC 3986 reference relative to the
/// resource's own URL.
pub fn resolve_reference(resource_url: &str, reference: &str) -> Result<MapLocation> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(MapLocation::Remote(reference.to_string()));
    }

    if reference.starts_with("data:") {
        return Ok(MapLocation::Inline(reference.to_string()));
    }

    let base = Url::parse(resource_url)?;
    let resolved = base.join(reference)?;
    Ok(MapLocation::Remote(resolved.to_string()))
}

/// Decode the payload of an inline `data:` source map.
///
/// Supports `;base64,` payloads and plain (unencoded) payloads.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;

    if meta.ends_with(";base64") {
        use base64::{engine::general_purpose::STANDARD, Engine};
        return STANDARD.decode(payload.trim()).ok();
    }

    Some(payload.as_bytes().to_vec())
}
