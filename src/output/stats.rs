//! Per-source statistics
//!
//! Collected from the storage layer for the `status` command.

use crate::crawler::IngestSummary;
use crate::storage::{PageCounts, SourceRecord, Storage};
use crate::{LibrarianError, Result};
use std::fmt::Write;

/// Statistics for one source
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub source: SourceRecord,
    pub pages: PageCounts,
    pub active_documents: u64,
    pub inactive_documents: u64,
    pub chunks: u64,
}

/// Loads statistics for one source
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `source_id` - The source to describe
///
/// # Returns
///
/// * `Ok(SourceStats)` - Successfully loaded statistics
/// * `Err(LibrarianError)` - Unknown source or a storage fault
pub fn load_source_stats<S: Storage + ?Sized>(storage: &S, source_id: i64) -> Result<SourceStats> {
    let source = storage
        .get_source(source_id)?
        .ok_or(LibrarianError::SourceNotFound(source_id))?;
    let pages = storage.count_pages(source_id)?;
    let (active_documents, inactive_documents) = storage.count_documents(source_id)?;
    let chunks = storage.count_chunks(source_id)?;

    Ok(SourceStats {
        source,
        pages,
        active_documents,
        inactive_documents,
        chunks,
    })
}

/// Renders source statistics as text
pub fn format_source_stats(stats: &SourceStats) -> String {
    let source = &stats.source;
    let mut out = String::new();

    let _ = writeln!(out, "=== Source {}: {} ===\n", source.id, source.name);
    let _ = writeln!(out, "Configuration:");
    let _ = writeln!(out, "  Root URL: {}", source.root_url.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "  Allowed paths: {}", join_or_dash(source.allowed_paths.iter()));
    let _ = writeln!(out, "  Denied paths: {}", join_or_dash(source.denied_paths.iter()));
    let _ = writeln!(
        out,
        "  Max depth: {}, max pages: {}",
        source.max_depth, source.max_pages
    );
    let _ = writeln!(out, "  Version: {}", source.effective_version());
    let _ = writeln!(out);

    let pages = &stats.pages;
    let _ = writeln!(out, "Pages:");
    let _ = writeln!(out, "  Total: {}", pages.total);
    for (label, count) in [
        ("Pending", pages.pending),
        ("Fetching", pages.fetching),
        ("Done", pages.done),
        ("Failed", pages.failed),
    ] {
        let percentage = if pages.total > 0 {
            (count as f64 / pages.total as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "  {}: {} ({:.1}%)", label, count, percentage);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Documents:");
    let _ = writeln!(out, "  Active: {}", stats.active_documents);
    let _ = writeln!(out, "  Inactive: {}", stats.inactive_documents);
    let _ = writeln!(out, "  Chunks: {}", stats.chunks);
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Last sync: {}",
        source.last_sync_at.as_deref().unwrap_or("never")
    );
    if let Some(error) = &source.last_error {
        let _ = writeln!(out, "Last error: {}", error);
    }

    out
}

/// Prints source statistics to stdout
pub fn print_source_stats(stats: &SourceStats) {
    print!("{}", format_source_stats(stats));
}

/// Renders a run summary as a single line
pub fn format_ingest_summary(summary: &IngestSummary) -> String {
    let mut line = format!(
        "processed: {}, updated: {}, skipped: {}, failed: {}, deactivated: {} (version {})",
        summary.processed,
        summary.updated,
        summary.skipped,
        summary.failed,
        summary.deactivated,
        summary.version_label
    );
    if summary.interrupted {
        line.push_str(" [interrupted]");
    }
    line
}

fn join_or_dash<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}
