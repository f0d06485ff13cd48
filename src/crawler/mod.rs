//! Web ingestion pipeline
//!
//! This module contains the crawl engine, including:
//! - Discovery of candidate URLs (link manifest, sitemap)
//! - Page fetching with an optional headless renderer
//! - The content gate and hash-based change detection
//! - The store-driven batch scheduler
//! - Run coordination and the deactivation sweep

mod change;
mod chunk;
mod coordinator;
mod discovery;
mod fetcher;
mod gate;
mod progress;
mod renderer;
mod scheduler;

pub use change::{content_hash, detect_change, document_uri, ChangeStatus, DOCUMENT_CONTENT_TYPE};
pub use chunk::{ChunkBuilder, ChunkInput, ParagraphChunker, DEFAULT_MAX_CHUNK_CHARS};
pub use coordinator::{ingest_web_source, IngestOptions, IngestServices, IngestSummary};
pub use discovery::{
    manifest_candidates, parse_manifest_links, parse_sitemap, Discoverer, Discovery,
    HttpDiscoverer, Sitemap, SitemapKind,
};
pub use fetcher::{
    build_http_client, canonical_path, looks_like_app_shell, markdown_links, page_from_html,
    page_from_markdown, FetchError, FetchOptions, FetchedPage, HttpFetcher, PageFetcher,
};
pub use gate::{check_content, contains_code_snippet, sanitized_len, GateRejection, GateRules};
pub use progress::{
    NoProgress, PageOutcome, ProgressEvent, ProgressPhase, ProgressSink, TracingProgress,
};
pub use renderer::{BrowserlessRenderer, HeadlessRenderer};
pub use scheduler::{CrawlPlan, CrawlServices, CrawlTally, Scheduler};
