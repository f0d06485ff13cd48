//! Storage module for persisting crawl data
//!
//! This module handles all persistence for the ingestion pipeline, including:
//! - SQLite database initialization, schema and recovery from I/O faults
//! - Source registry and sync bookkeeping
//! - Crawl page queue (the scheduler's only source of truth)
//! - Documents with hash-based change detection, and their chunks
//!
//! An in-memory backend implements the same trait for tests and embedders.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use sqlite::{is_recoverable, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::url::{default_allowed_paths, PathPrefixSet};
use crate::PageStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// Default crawl depth for newly registered web sources
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Default page budget for newly registered web sources
pub const DEFAULT_MAX_PAGES: u32 = 500;

/// Version label used when a source declares none
pub const DEFAULT_VERSION_LABEL: &str = "latest";

/// Storage handle shared between the scheduler and its page tasks
pub type SharedStorage<S> = Arc<Mutex<S>>;

/// Wraps a storage backend for use by the ingestion engine
pub fn shared<S: Storage>(storage: S) -> SharedStorage<S> {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared storage handle, mapping poisoning to a storage error
pub fn lock<S>(storage: &Mutex<S>) -> StorageResult<MutexGuard<'_, S>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// A registered web source
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub root_url: Option<String>,
    pub allowed_paths: PathPrefixSet,
    pub denied_paths: PathPrefixSet,
    pub max_depth: u32,
    pub max_pages: u32,
    pub version_label: Option<String>,
    pub force_headless: bool,
    pub require_code_snippets: bool,
    pub last_sync_at: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl SourceRecord {
    /// The version label documents are stored under
    pub fn effective_version(&self) -> &str {
        self.version_label.as_deref().unwrap_or(DEFAULT_VERSION_LABEL)
    }
}

/// Input for registering a new web source
#[derive(Debug, Clone)]
pub struct NewWebSource {
    pub name: String,
    pub root_url: String,
    pub allowed_paths: PathPrefixSet,
    pub denied_paths: PathPrefixSet,
    pub max_depth: u32,
    pub max_pages: u32,
    pub version_label: Option<String>,
    pub force_headless: bool,
    pub require_code_snippets: bool,
}

impl NewWebSource {
    /// Creates a source for `root` with the standard defaults
    ///
    /// The name defaults to the host, and a root URL with a non-root path
    /// scopes the allow-list to that path.
    pub fn new(root: &Url) -> Self {
        Self {
            name: root.host_str().unwrap_or("web").to_string(),
            root_url: root.to_string(),
            allowed_paths: default_allowed_paths(root, PathPrefixSet::empty()),
            denied_paths: PathPrefixSet::empty(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            version_label: None,
            force_headless: false,
            require_code_snippets: true,
        }
    }

    /// Replaces the allow-list, re-applying the root-path default when empty
    pub fn with_allowed_paths(mut self, root: &Url, allowed: PathPrefixSet) -> Self {
        self.allowed_paths = default_allowed_paths(root, allowed);
        self
    }
}

/// Sync bookkeeping written back after each ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub last_sync_at: Option<String>,
    pub last_error: Option<String>,
}

/// One URL's crawl record
#[derive(Debug, Clone)]
pub struct CrawlPageRecord {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub normalized_url: String,
    pub depth: u32,
    pub status: PageStatus,
    pub last_crawled_at: Option<String>,
    pub error_message: Option<String>,
    /// Document path produced the last time this page finished successfully
    pub document_path: Option<String>,
}

/// Aggregate page counts for one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub total: u64,
    pub pending: u64,
    pub fetching: u64,
    pub done: u64,
    pub failed: u64,
}

/// Input for a document upsert keyed by (source, path, version)
#[derive(Debug, Clone)]
pub struct DocumentUpsert<'a> {
    pub source_id: i64,
    pub path: &'a str,
    pub uri: &'a str,
    pub title: &'a str,
    pub hash: &'a str,
    pub content_type: &'a str,
    pub version_label: &'a str,
    pub content: &'a str,
}

/// Outcome of a document upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    /// True when the document is new or its content hash differs
    pub changed: bool,
}

/// A stored document
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: i64,
    pub source_id: i64,
    pub path: String,
    pub uri: String,
    pub title: String,
    pub content_hash: String,
    pub content_type: String,
    pub version_label: String,
    pub content: String,
    pub active: bool,
}

/// A chunk produced by the chunk builder, before insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub heading: Option<String>,
    pub hash: String,
}

/// A stored chunk
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub document_id: i64,
    pub ordinal: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub heading: Option<String>,
    pub hash: String,
}
