//! Librarian: a local, searchable mirror of developer documentation
//!
//! This crate implements the web ingestion pipeline: URL discovery, a
//! store-driven concurrent crawl scheduler, content gating, hash-based change
//! detection, chunk regeneration and the post-crawl deactivation sweep.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Librarian operations
#[derive(Debug, Error)]
pub enum LibrarianError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Source {0} not found")]
    SourceNotFound(i64),

    #[error("Source {0} is missing a root URL")]
    MissingRootUrl(i64),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::PageStatus,
        to: state::PageStatus,
    },

    #[error("Headless renderer error: {0}")]
    Renderer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid path prefix: {0}")]
    InvalidPathPrefix(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Librarian operations
pub type Result<T> = std::result::Result<T, LibrarianError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{ingest_web_source, IngestOptions, IngestSummary};
pub use state::PageStatus;
pub use url::{normalize_url, CrawlScope, PathPrefixSet};
