//! Reconstruction of original sources from source maps.
//!
//! - [`reference`]: locating and resolving `sourceMappingURL` comments
//! - [`document`]: the map document schema
//! - [`mime`]: MIME types for reconstructed files
//! - [`extractor`]: the end-to-end extraction per captured resource

pub mod document;
pub mod extractor;
pub mod mime;
pub mod reference;

pub use document::SourceMapDocument;
pub use extractor::{
    is_eligible, Extraction, HttpMapFetcher, MapFetcher, SourceMapExtractor, DEFAULT_MAP_RATE_LIMIT,
    DEFAULT_MAP_TIMEOUT_SECS,
};
pub use mime::mime_for_path;
pub use reference::{find_reference, resolve_reference, MapLocation};
