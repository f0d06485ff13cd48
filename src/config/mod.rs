//! Configuration module for Librarian
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every setting the engine needs (including the data directory) is carried
//! on [`Config`]; nothing is read from the environment.
//!
//! # Example
//!
//! ```no_run
//! use librarian::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("librarian.toml")).unwrap();
//! println!("Database: {}", config.storage.database_path().display());
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, HeadlessConfig, StorageConfig, DEFAULT_CONCURRENCY,
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MIN_CONTENT_CHARS,
};

pub use parser::{load_config, load_config_or_default, parse_config};
