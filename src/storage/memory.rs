//! In-memory storage backend
//!
//! Mirrors the SQLite backend's semantics without a database, so the
//! scheduler can be exercised in tests and embedded without disk state.

use crate::state::PageStatus;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    ChunkDraft, ChunkRecord, CrawlPageRecord, DocumentRecord, DocumentUpsert, NewWebSource,
    PageCounts, SourceRecord, SyncStatus, UpsertOutcome,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};

/// Storage backend holding everything in ordered maps
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sources: BTreeMap<i64, SourceRecord>,
    pages: BTreeMap<i64, CrawlPageRecord>,
    documents: BTreeMap<i64, DocumentRecord>,
    chunks: BTreeMap<i64, ChunkRecord>,
    next_id: i64,
    chunk_writes: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunk delete/insert operations performed so far
    pub fn chunk_writes(&self) -> u64 {
        self.chunk_writes
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn page_mut(&mut self, page_id: i64) -> StorageResult<&mut CrawlPageRecord> {
        self.pages
            .get_mut(&page_id)
            .ok_or(StorageError::PageNotFound(page_id))
    }

    fn source_pages(&self, source_id: i64) -> impl Iterator<Item = &CrawlPageRecord> {
        self.pages
            .values()
            .filter(move |page| page.source_id == source_id)
    }

    fn reset_status(&mut self, source_id: i64, from: PageStatus) -> u64 {
        let mut reset = 0;
        for page in self.pages.values_mut() {
            if page.source_id == source_id && page.status == from {
                page.status = PageStatus::Pending;
                if from == PageStatus::Done {
                    page.error_message = None;
                    page.document_path = None;
                }
                reset += 1;
            }
        }
        reset
    }
}

impl Storage for MemoryStorage {
    fn add_web_source(&mut self, source: &NewWebSource) -> StorageResult<i64> {
        let id = self.allocate_id();
        self.sources.insert(
            id,
            SourceRecord {
                id,
                name: source.name.clone(),
                root_url: Some(source.root_url.clone()),
                allowed_paths: source.allowed_paths.clone(),
                denied_paths: source.denied_paths.clone(),
                max_depth: source.max_depth,
                max_pages: source.max_pages,
                version_label: source.version_label.clone(),
                force_headless: source.force_headless,
                require_code_snippets: source.require_code_snippets,
                last_sync_at: None,
                last_error: None,
                created_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(id)
    }

    fn get_source(&self, source_id: i64) -> StorageResult<Option<SourceRecord>> {
        Ok(self.sources.get(&source_id).cloned())
    }

    fn list_sources(&self) -> StorageResult<Vec<SourceRecord>> {
        Ok(self.sources.values().cloned().collect())
    }

    fn remove_source(&mut self, source_id: i64) -> StorageResult<bool> {
        if self.sources.remove(&source_id).is_none() {
            return Ok(false);
        }
        self.pages.retain(|_, page| page.source_id != source_id);

        let removed_docs: HashSet<i64> = self
            .documents
            .values()
            .filter(|doc| doc.source_id == source_id)
            .map(|doc| doc.id)
            .collect();
        self.documents.retain(|id, _| !removed_docs.contains(id));
        self.chunks
            .retain(|_, chunk| !removed_docs.contains(&chunk.document_id));
        Ok(true)
    }

    fn update_source_sync(&mut self, source_id: i64, status: &SyncStatus) -> StorageResult<()> {
        let source = self
            .sources
            .get_mut(&source_id)
            .ok_or(StorageError::SourceNotFound(source_id))?;
        source.last_sync_at = status.last_sync_at.clone();
        source.last_error = status.last_error.clone();
        Ok(())
    }

    fn upsert_crawl_page(
        &mut self,
        source_id: i64,
        url: &str,
        normalized_url: &str,
        depth: u32,
    ) -> StorageResult<bool> {
        if self
            .source_pages(source_id)
            .any(|page| page.normalized_url == normalized_url)
        {
            return Ok(false);
        }

        let id = self.allocate_id();
        self.pages.insert(
            id,
            CrawlPageRecord {
                id,
                source_id,
                url: url.to_string(),
                normalized_url: normalized_url.to_string(),
                depth,
                status: PageStatus::Pending,
                last_crawled_at: None,
                error_message: None,
                document_path: None,
            },
        );
        Ok(true)
    }

    fn set_page_status(
        &mut self,
        page_id: i64,
        status: PageStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let page = self.page_mut(page_id)?;
        page.status = status;
        page.error_message = error_message.map(str::to_string);
        if status.is_terminal() {
            page.last_crawled_at = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    fn set_page_document_path(&mut self, page_id: i64, path: Option<&str>) -> StorageResult<()> {
        self.page_mut(page_id)?.document_path = path.map(str::to_string);
        Ok(())
    }

    fn pending_pages(&self, source_id: i64, limit: usize) -> StorageResult<Vec<CrawlPageRecord>> {
        Ok(self
            .source_pages(source_id)
            .filter(|page| page.status == PageStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_pages(&self, source_id: i64) -> StorageResult<Vec<CrawlPageRecord>> {
        Ok(self.source_pages(source_id).cloned().collect())
    }

    fn count_pages(&self, source_id: i64) -> StorageResult<PageCounts> {
        let mut counts = PageCounts::default();
        for page in self.source_pages(source_id) {
            counts.total += 1;
            match page.status {
                PageStatus::Pending => counts.pending += 1,
                PageStatus::Fetching => counts.fetching += 1,
                PageStatus::Done => counts.done += 1,
                PageStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    fn clear_pages(&mut self, source_id: i64) -> StorageResult<u64> {
        let before = self.pages.len();
        self.pages.retain(|_, page| page.source_id != source_id);
        Ok((before - self.pages.len()) as u64)
    }

    fn reset_interrupted_pages(&mut self, source_id: i64) -> StorageResult<u64> {
        Ok(self.reset_status(source_id, PageStatus::Fetching))
    }

    fn begin_pass(&mut self, source_id: i64) -> StorageResult<u64> {
        Ok(self.reset_status(source_id, PageStatus::Done))
    }

    fn done_document_paths(&self, source_id: i64) -> StorageResult<HashSet<String>> {
        Ok(self
            .source_pages(source_id)
            .filter(|page| page.status == PageStatus::Done)
            .filter_map(|page| page.document_path.clone())
            .collect())
    }

    fn upsert_document(&mut self, document: &DocumentUpsert<'_>) -> StorageResult<UpsertOutcome> {
        let existing = self.documents.values_mut().find(|doc| {
            doc.source_id == document.source_id
                && doc.path == document.path
                && doc.version_label == document.version_label
        });

        if let Some(existing) = existing {
            existing.active = true;
            if existing.content_hash == document.hash {
                return Ok(UpsertOutcome {
                    id: existing.id,
                    changed: false,
                });
            }
            existing.uri = document.uri.to_string();
            existing.title = document.title.to_string();
            existing.content_hash = document.hash.to_string();
            existing.content_type = document.content_type.to_string();
            existing.content = document.content.to_string();
            return Ok(UpsertOutcome {
                id: existing.id,
                changed: true,
            });
        }

        let id = self.allocate_id();
        self.documents.insert(
            id,
            DocumentRecord {
                id,
                source_id: document.source_id,
                path: document.path.to_string(),
                uri: document.uri.to_string(),
                title: document.title.to_string(),
                content_hash: document.hash.to_string(),
                content_type: document.content_type.to_string(),
                version_label: document.version_label.to_string(),
                content: document.content.to_string(),
                active: true,
            },
        );
        Ok(UpsertOutcome { id, changed: true })
    }

    fn get_document(
        &self,
        source_id: i64,
        path: &str,
        version_label: &str,
    ) -> StorageResult<Option<DocumentRecord>> {
        Ok(self
            .documents
            .values()
            .find(|doc| {
                doc.source_id == source_id && doc.path == path && doc.version_label == version_label
            })
            .cloned())
    }

    fn list_documents(
        &self,
        source_id: i64,
        version_label: &str,
    ) -> StorageResult<Vec<DocumentRecord>> {
        let mut documents: Vec<DocumentRecord> = self
            .documents
            .values()
            .filter(|doc| doc.source_id == source_id && doc.version_label == version_label)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    fn deactivate_missing_documents(
        &mut self,
        source_id: i64,
        version_label: &str,
        kept: &HashSet<String>,
    ) -> StorageResult<u64> {
        let mut deactivated = 0;
        for doc in self.documents.values_mut() {
            if doc.source_id == source_id
                && doc.version_label == version_label
                && doc.active
                && !kept.contains(&doc.path)
            {
                doc.active = false;
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    fn delete_chunks(&mut self, document_id: i64) -> StorageResult<u64> {
        self.chunk_writes += 1;
        let before = self.chunks.len();
        self.chunks.retain(|_, chunk| chunk.document_id != document_id);
        Ok((before - self.chunks.len()) as u64)
    }

    fn insert_chunks(&mut self, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()> {
        if !self.documents.contains_key(&document_id) {
            return Err(StorageError::DocumentNotFound(document_id));
        }
        self.chunk_writes += 1;
        for draft in chunks {
            let id = self.allocate_id();
            self.chunks.insert(
                id,
                ChunkRecord {
                    id,
                    document_id,
                    ordinal: draft.ordinal,
                    text: draft.text.clone(),
                    char_start: draft.char_start,
                    char_end: draft.char_end,
                    heading: draft.heading.clone(),
                    hash: draft.hash.clone(),
                },
            );
        }
        Ok(())
    }

    fn list_chunks(&self, document_id: i64) -> StorageResult<Vec<ChunkRecord>> {
        let mut chunks: Vec<ChunkRecord> = self
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.ordinal);
        Ok(chunks)
    }

    fn count_documents(&self, source_id: i64) -> StorageResult<(u64, u64)> {
        let mut counts = (0, 0);
        for doc in self.documents.values().filter(|d| d.source_id == source_id) {
            if doc.active {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
        }
        Ok(counts)
    }

    fn count_chunks(&self, source_id: i64) -> StorageResult<u64> {
        let docs: HashSet<i64> = self
            .documents
            .values()
            .filter(|doc| doc.source_id == source_id)
            .map(|doc| doc.id)
            .collect();
        Ok(self
            .chunks
            .values()
            .filter(|chunk| docs.contains(&chunk.document_id))
            .count() as u64)
    }
}
