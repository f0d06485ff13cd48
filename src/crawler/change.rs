//! Hash-based change detection

use sha2::{Digest, Sha256};
use url::Url;

/// Content type recorded for every crawled document
pub const DOCUMENT_CONTENT_TYPE: &str = "text/markdown";

/// How fetched content relates to what is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    New,
    Changed,
    Unchanged,
}

impl ChangeStatus {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

/// SHA-256 of the content, hex encoded
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Compares a freshly computed hash with the stored one
pub fn detect_change(stored_hash: Option<&str>, hash: &str) -> ChangeStatus {
    match stored_hash {
        None => ChangeStatus::New,
        Some(stored) if stored == hash => ChangeStatus::Unchanged,
        Some(_) => ChangeStatus::Changed,
    }
}

/// Canonical document URI: `web://<host[:port]><path>`
pub fn document_uri(page_url: &Url, path: &str) -> String {
    let host = crate::url::host_key(page_url).unwrap_or_default();
    format!("web://{}{}", host, path)
}
