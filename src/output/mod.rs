//! Output module for source listings and statistics
//!
//! This module handles:
//! - Per-source crawl and document statistics
//! - Formatting run summaries and source listings for the CLI

pub mod stats;

pub use stats::{
    format_ingest_summary, format_source_stats, load_source_stats, print_source_stats,
    SourceStats,
};

use crate::storage::SourceRecord;

/// Renders one line per source: id, name, root URL and last sync
pub fn format_source_list(sources: &[SourceRecord]) -> String {
    if sources.is_empty() {
        return "No sources registered.\n".to_string();
    }

    sources
        .iter()
        .map(|s| {
            let status = match (&s.last_error, &s.last_sync_at) {
                (Some(_), _) => "error",
                (None, Some(_)) => "synced",
                (None, None) => "never synced",
            };
            format!(
                "{:>4}  {:<24} {} [{}]\n",
                s.id,
                s.name,
                s.root_url.as_deref().unwrap_or("-"),
                status
            )
        })
        .collect()
}
