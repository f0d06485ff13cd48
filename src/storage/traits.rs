//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::PageStatus;
use crate::storage::{
    ChunkDraft, ChunkRecord, CrawlPageRecord, DocumentRecord, DocumentUpsert, NewWebSource,
    PageCounts, SourceRecord, SyncStatus, UpsertOutcome,
};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("Page not found: {0}")]
    PageNotFound(i64),

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every operation the ingestion engine performs against
/// persisted state. The engine holds no queue of its own: all page selection
/// goes through [`Storage::pending_pages`].
pub trait Storage {
    // ===== Source Registry =====

    /// Registers a new web source
    ///
    /// # Returns
    ///
    /// The ID of the newly created source
    fn add_web_source(&mut self, source: &NewWebSource) -> StorageResult<i64>;

    /// Gets a source by ID
    fn get_source(&self, source_id: i64) -> StorageResult<Option<SourceRecord>>;

    /// Lists every registered source ordered by ID
    fn list_sources(&self) -> StorageResult<Vec<SourceRecord>>;

    /// Removes a source together with its pages, documents and chunks
    ///
    /// # Returns
    ///
    /// `true` if a source was removed
    fn remove_source(&mut self, source_id: i64) -> StorageResult<bool>;

    /// Writes back sync bookkeeping after an ingestion run
    fn update_source_sync(&mut self, source_id: i64, status: &SyncStatus) -> StorageResult<()>;

    // ===== Crawl Pages =====

    /// Inserts a pending page unless one exists for (source, normalized URL)
    ///
    /// An existing row is left untouched, including its depth.
    ///
    /// # Returns
    ///
    /// `true` if a new page was created
    fn upsert_crawl_page(
        &mut self,
        source_id: i64,
        url: &str,
        normalized_url: &str,
        depth: u32,
    ) -> StorageResult<bool>;

    /// Sets a page's status and error message
    ///
    /// Moving to `done` or `failed` stamps `last_crawled_at`.
    fn set_page_status(
        &mut self,
        page_id: i64,
        status: PageStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Records the document path a page produced on its last success
    fn set_page_document_path(&mut self, page_id: i64, path: Option<&str>) -> StorageResult<()>;

    /// Gets up to `limit` pending pages in creation order
    fn pending_pages(&self, source_id: i64, limit: usize) -> StorageResult<Vec<CrawlPageRecord>>;

    /// Gets every page for a source in creation order
    fn list_pages(&self, source_id: i64) -> StorageResult<Vec<CrawlPageRecord>>;

    /// Aggregate page counts for a source
    fn count_pages(&self, source_id: i64) -> StorageResult<PageCounts>;

    /// Deletes every page for a source
    fn clear_pages(&mut self, source_id: i64) -> StorageResult<u64>;

    /// Moves pages left in `fetching` by an interrupted run back to `pending`
    fn reset_interrupted_pages(&mut self, source_id: i64) -> StorageResult<u64>;

    /// Moves every `done` page back to `pending` to start a new pass
    fn begin_pass(&mut self, source_id: i64) -> StorageResult<u64>;

    /// Document paths recorded on `done` pages in the current pass
    fn done_document_paths(&self, source_id: i64) -> StorageResult<HashSet<String>>;

    // ===== Documents =====

    /// Inserts or updates a document keyed by (source, path, version)
    ///
    /// The stored content is only rewritten when the hash differs. Either way
    /// the document is (re)activated.
    fn upsert_document(&mut self, document: &DocumentUpsert<'_>) -> StorageResult<UpsertOutcome>;

    /// Upserts a document and, when its content changed, replaces its chunks
    ///
    /// Readers must never observe new content paired with stale chunks.
    fn store_document(
        &mut self,
        document: &DocumentUpsert<'_>,
        chunks: &[ChunkDraft],
    ) -> StorageResult<UpsertOutcome> {
        let outcome = self.upsert_document(document)?;
        if outcome.changed {
            self.replace_chunks(outcome.id, chunks)?;
        }
        Ok(outcome)
    }

    /// Gets a document by its key
    fn get_document(
        &self,
        source_id: i64,
        path: &str,
        version_label: &str,
    ) -> StorageResult<Option<DocumentRecord>>;

    /// Lists documents for a source and version ordered by path
    fn list_documents(
        &self,
        source_id: i64,
        version_label: &str,
    ) -> StorageResult<Vec<DocumentRecord>>;

    /// Marks active documents whose path is not in `kept` as inactive
    ///
    /// # Returns
    ///
    /// The number of documents deactivated
    fn deactivate_missing_documents(
        &mut self,
        source_id: i64,
        version_label: &str,
        kept: &HashSet<String>,
    ) -> StorageResult<u64>;

    // ===== Chunks =====

    /// Deletes every chunk of a document
    fn delete_chunks(&mut self, document_id: i64) -> StorageResult<u64>;

    /// Inserts a chunk set for a document
    fn insert_chunks(&mut self, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()>;

    /// Replaces a document's chunk set as one unit
    ///
    /// Backends with transactions should override this so readers never see
    /// the set half rebuilt.
    fn replace_chunks(&mut self, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()> {
        self.delete_chunks(document_id)?;
        self.insert_chunks(document_id, chunks)
    }

    /// Gets a document's chunks in ordinal order
    fn list_chunks(&self, document_id: i64) -> StorageResult<Vec<ChunkRecord>>;

    // ===== Statistics =====

    /// Counts (active, inactive) documents for a source across versions
    fn count_documents(&self, source_id: i64) -> StorageResult<(u64, u64)>;

    /// Counts chunks belonging to a source's documents
    fn count_chunks(&self, source_id: i64) -> StorageResult<u64>;
}
