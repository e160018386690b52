//! Parsed form of a `.map` file.
//!
//! Only `sources`, `sourcesContent` and `sourceRoot` drive reconstruction.
//! The remaining fields are parsed so that well-formed maps never fail, but
//! the `mappings` table is never decoded. Missing or `null` fields (and `null`
//! array entries) read as empty.

use serde::{Deserialize, Deserializer, Serialize};

/// XSSI guard some servers prepend to JSON documents.
const XSSI_PREFIX: &[u8] = b")]}'";

/// A source map document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapDocument {
    #[serde(default, deserialize_with = "nullable")]
    pub version: i64,
    #[serde(default, deserialize_with = "nullable_strings")]
    pub sources: Vec<String>,
    #[serde(default, deserialize_with = "nullable_strings")]
    pub sources_content: Vec<String>,
    #[serde(default, deserialize_with = "nullable_strings")]
    pub names: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub mappings: String,
    #[serde(default, deserialize_with = "nullable")]
    pub file: String,
    #[serde(default, deserialize_with = "nullable")]
    pub source_root: String,
}

impl SourceMapDocument {
    /// Decode a source map from raw bytes.
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(strip_xssi_prefix(bytes))
    }

    /// `(index, source path, embedded content)` for every entry that carries
    /// non-empty embedded content. Entries past the end of `sourcesContent`
    /// are skipped.
    pub fn embedded_sources(&self) -> impl Iterator<Item = (usize, &str, &str)> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(i, source)| {
                let content = self.sources_content.get(i)?;
                if content.is_empty() {
                    return None;
                }
                Some((i, source.as_str(), content.as_str()))
            })
    }
}

fn strip_xssi_prefix(bytes: &[u8]) -> &[u8] {
    match bytes.strip_prefix(XSSI_PREFIX) {
        Some(rest) => match rest.iter().position(|&b| b == b'\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        },
        None => bytes,
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Option<String>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let json = br#"{
            "version": 3,
            "file": "app.js",
            "sourceRoot": "",
            "sources": ["webpack:///./src/App.js", "webpack:///./src/index.js"],
            "sourcesContent": ["export default App;", "import App from './App';"],
            "names": ["App"],
            "mappings": "AAAA;AACA"
        }"#;

        let doc = SourceMapDocument::parse(json).unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.file, "app.js");
        assert_eq!(doc.sources.len(), 2);
        assert_eq!(doc.sources_content[1], "import App from './App';");
        assert_eq!(doc.names, vec!["App"]);
    }

    #[test]
    fn test_missing_and_null_fields() {
        let doc = SourceMapDocument::parse(
            br#"{"version":3,"sources":["a.js",null],"sourcesContent":null,"sourceRoot":null,"mappings":""}"#,
        )
        .unwrap();
        assert_eq!(doc.sources, vec!["a.js".to_string(), String::new()]);
        assert!(doc.sources_content.is_empty());
        assert!(doc.source_root.is_empty());
        assert!(doc.file.is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let doc = SourceMapDocument::parse(
            br#"{"version":3,"sources":[],"x_google_ignoreList":[0],"debugId":"abc"}"#,
        )
        .unwrap();
        assert!(doc.sources.is_empty());
    }

    #[test]
    fn test_xssi_prefix_stripped() {
        let doc = SourceMapDocument::parse(b")]}'\n{\"version\":3,\"sources\":[\"a.js\"]}").unwrap();
        assert_eq!(doc.sources, vec!["a.js"]);
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(SourceMapDocument::parse(b"<!DOCTYPE html><html>").is_err());
        assert!(SourceMapDocument::parse(br#"{"version":3,"sources":"#).is_err());
    }

    #[test]
    fn test_embedded_sources_skips_missing_and_empty() {
        let doc = SourceMapDocument {
            sources: vec!["a.js".into(), "b.js".into(), "c.js".into(), "d.js".into()],
            sources_content: vec!["A".into(), String::new(), "C".into()],
            ..SourceMapDocument::default()
        };

        let entries: Vec<_> = doc.embedded_sources().collect();
        assert_eq!(entries, vec![(0, "a.js", "A"), (2, "c.js", "C")]);
    }
}
