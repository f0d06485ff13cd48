use serde::Deserialize;
use std::path::PathBuf;

/// Default number of pages processed concurrently in one batch
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default per-page fetch/render timeout in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default minimum size of sanitized content before it is stored
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 200;

/// Main configuration structure for Librarian
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub headless: HeadlessConfig,
}

/// Where the on-disk store lives
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database files
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    #[serde(rename = "database-file", default = "default_database_file")]
    pub database_file: String,
}

impl StorageConfig {
    /// Full path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of pages processed concurrently in one batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-page fetch/render timeout (seconds)
    #[serde(rename = "fetch-timeout-secs", default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Optional HTTP(S) proxy for page fetches and discovery
    #[serde(default)]
    pub proxy: Option<String>,

    /// Minimum characters of sanitized content for a page to be stored
    #[serde(rename = "min-content-chars", default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            proxy: None,
            min_content_chars: default_min_content_chars(),
        }
    }
}

/// Headless rendering service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeadlessConfig {
    /// Whether the renderer is created for ingestion runs
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of a Browserless-compatible `/content` API
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API token appended as `?token=`
    #[serde(default)]
    pub token: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".librarian")
}

fn default_database_file() -> String {
    "librarian.db".to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    format!("librarian/{}", env!("CARGO_PKG_VERSION"))
}

fn default_min_content_chars() -> usize {
    DEFAULT_MIN_CONTENT_CHARS
}
