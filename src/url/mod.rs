//! URL handling module for Librarian
//!
//! This module provides URL normalization, host extraction, validated
//! path-prefix sets and the per-source crawl scope filter.

mod domain;
mod normalize;
mod scope;

pub use domain::{extract_host, host_key};
pub use normalize::{normalize_url, resolve_url};
pub use scope::{default_allowed_paths, CrawlScope, PathPrefixSet};

use url::Url;

/// File names recognised as plaintext link manifests
pub const MANIFEST_FILE_NAMES: &[&str] = &["llms.txt", "llms-full.txt"];

/// Returns true if the URL points at a link manifest such as `/llms.txt`
pub fn is_manifest_url(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| MANIFEST_FILE_NAMES.contains(&last))
        .unwrap_or(false)
}
