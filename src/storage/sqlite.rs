//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::PageStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    ChunkDraft, ChunkRecord, CrawlPageRecord, DocumentRecord, DocumentUpsert, NewWebSource,
    PageCounts, SourceRecord, SyncStatus, UpsertOutcome,
};
use crate::url::PathPrefixSet;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

const SOURCE_COLUMNS: &str = "id, name, root_url, allowed_paths, denied_paths, max_depth, \
     max_pages, version_label, force_headless, require_code_snippets, last_sync_at, \
     last_error, created_at";

const PAGE_COLUMNS: &str = "id, source_id, url, normalized_url, depth, status, \
     last_crawled_at, error_message, document_path";

const DOCUMENT_COLUMNS: &str = "id, source_id, path, uri, title, content_hash, content_type, \
     version_label, content, active";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// If initialization hits a low-level I/O fault (for example a short read
    /// on a truncated WAL), the database and its `-wal`/`-shm` files are
    /// deleted and initialization is retried exactly once. Any other fault,
    /// or a second failure, is returned.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_recovery(path, Self::open_once)
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn open_once(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    fn open_with_recovery<F>(path: &Path, mut open_once: F) -> StorageResult<Self>
    where
        F: FnMut(&Path) -> StorageResult<Self>,
    {
        match open_once(path) {
            Ok(storage) => Ok(storage),
            Err(err) if is_recoverable(&err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Database failed to initialize, recreating it"
                );
                remove_database_files(path)?;
                open_once(path)
            }
            Err(err) => Err(err),
        }
    }
}

/// Returns true for storage faults that justify recreating the database files
pub fn is_recoverable(err: &StorageError) -> bool {
    match err {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(code, message)) => {
            code.code == ErrorCode::SystemIoFailure
                || message
                    .as_deref()
                    .map(is_io_fault_message)
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn is_io_fault_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("disk i/o error") || message.contains("short_read")
}

fn remove_database_files(path: &Path) -> StorageResult<()> {
    for candidate in [
        path.to_path_buf(),
        with_suffix(path, "-wal"),
        with_suffix(path, "-shm"),
    ] {
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn prefix_set_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<PathPrefixSet> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    Ok(SourceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_url: row.get(2)?,
        allowed_paths: prefix_set_column(row, 3)?,
        denied_paths: prefix_set_column(row, 4)?,
        max_depth: row.get(5)?,
        max_pages: row.get(6)?,
        version_label: row.get(7)?,
        force_headless: row.get(8)?,
        require_code_snippets: row.get(9)?,
        last_sync_at: row.get(10)?,
        last_error: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlPageRecord> {
    let status: String = row.get(5)?;
    Ok(CrawlPageRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        url: row.get(2)?,
        normalized_url: row.get(3)?,
        depth: row.get(4)?,
        status: PageStatus::from_db_string(&status).unwrap_or(PageStatus::Pending),
        last_crawled_at: row.get(6)?,
        error_message: row.get(7)?,
        document_path: row.get(8)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        path: row.get(2)?,
        uri: row.get(3)?,
        title: row.get(4)?,
        content_hash: row.get(5)?,
        content_type: row.get(6)?,
        version_label: row.get(7)?,
        content: row.get(8)?,
        active: row.get(9)?,
    })
}

fn insert_chunk_rows(conn: &Connection, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO chunks (document_id, ordinal, text, char_start, char_end, heading, hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for chunk in chunks {
        stmt.execute(params![
            document_id,
            chunk.ordinal,
            chunk.text,
            chunk.char_start as i64,
            chunk.char_end as i64,
            chunk.heading,
            chunk.hash,
        ])?;
    }
    Ok(())
}

fn upsert_document_row(conn: &Connection, document: &DocumentUpsert<'_>) -> StorageResult<UpsertOutcome> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, content_hash FROM documents
             WHERE source_id = ?1 AND path = ?2 AND version_label = ?3",
            params![document.source_id, document.path, document.version_label],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let now = Utc::now().to_rfc3339();
    let outcome = match existing {
        Some((id, hash)) if hash == document.hash => {
            conn.execute("UPDATE documents SET active = 1 WHERE id = ?1", params![id])?;
            UpsertOutcome { id, changed: false }
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE documents
                 SET uri = ?1, title = ?2, content_hash = ?3, content_type = ?4,
                     content = ?5, active = 1, updated_at = ?6
                 WHERE id = ?7",
                params![
                    document.uri,
                    document.title,
                    document.hash,
                    document.content_type,
                    document.content,
                    now,
                    id
                ],
            )?;
            UpsertOutcome { id, changed: true }
        }
        None => {
            conn.execute(
                "INSERT INTO documents (source_id, path, uri, title, content_hash,
                                        content_type, version_label, content, active,
                                        updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
                params![
                    document.source_id,
                    document.path,
                    document.uri,
                    document.title,
                    document.hash,
                    document.content_type,
                    document.version_label,
                    document.content,
                    now
                ],
            )?;
            UpsertOutcome {
                id: conn.last_insert_rowid(),
                changed: true,
            }
        }
    };
    Ok(outcome)
}

impl Storage for SqliteStorage {
    // ===== Source Registry =====

    fn add_web_source(&mut self, source: &NewWebSource) -> StorageResult<i64> {
        let allowed = serde_json::to_string(&source.allowed_paths)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let denied = serde_json::to_string(&source.denied_paths)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO sources (kind, name, root_url, allowed_paths, denied_paths, max_depth,
                                  max_pages, version_label, force_headless, require_code_snippets,
                                  created_at)
             VALUES ('web', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                source.name,
                source.root_url,
                allowed,
                denied,
                source.max_depth,
                source.max_pages,
                source.version_label,
                source.force_headless,
                source.require_code_snippets,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_source(&self, source_id: i64) -> StorageResult<Option<SourceRecord>> {
        let sql = format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS);
        let source = self
            .conn
            .query_row(&sql, params![source_id], source_from_row)
            .optional()?;
        Ok(source)
    }

    fn list_sources(&self) -> StorageResult<Vec<SourceRecord>> {
        let sql = format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let sources = stmt
            .query_map([], source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn remove_source(&mut self, source_id: i64) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sources WHERE id = ?1", params![source_id])?;
        Ok(removed > 0)
    }

    fn update_source_sync(&mut self, source_id: i64, status: &SyncStatus) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sources SET last_sync_at = ?1, last_error = ?2 WHERE id = ?3",
            params![status.last_sync_at, status.last_error, source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::SourceNotFound(source_id));
        }
        Ok(())
    }

    // ===== Crawl Pages =====

    fn upsert_crawl_page(
        &mut self,
        source_id: i64,
        url: &str,
        normalized_url: &str,
        depth: u32,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO crawl_pages (source_id, url, normalized_url, depth, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_id,
                url,
                normalized_url,
                depth,
                PageStatus::Pending.to_db_string()
            ],
        )?;
        Ok(inserted > 0)
    }

    fn set_page_status(
        &mut self,
        page_id: i64,
        status: PageStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let updated = if status.is_terminal() {
            let now = Utc::now().to_rfc3339();
            self.conn.execute(
                "UPDATE crawl_pages SET status = ?1, error_message = ?2, last_crawled_at = ?3
                 WHERE id = ?4",
                params![status.to_db_string(), error_message, now, page_id],
            )?
        } else {
            self.conn.execute(
                "UPDATE crawl_pages SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.to_db_string(), error_message, page_id],
            )?
        };

        if updated == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }
        Ok(())
    }

    fn set_page_document_path(&mut self, page_id: i64, path: Option<&str>) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE crawl_pages SET document_path = ?1 WHERE id = ?2",
            params![path, page_id],
        )?;
        if updated == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }
        Ok(())
    }

    fn pending_pages(&self, source_id: i64, limit: usize) -> StorageResult<Vec<CrawlPageRecord>> {
        let sql = format!(
            "SELECT {} FROM crawl_pages WHERE source_id = ?1 AND status = ?2 ORDER BY id LIMIT ?3",
            PAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pages = stmt
            .query_map(
                params![source_id, PageStatus::Pending.to_db_string(), limit as i64],
                page_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    fn list_pages(&self, source_id: i64) -> StorageResult<Vec<CrawlPageRecord>> {
        let sql = format!(
            "SELECT {} FROM crawl_pages WHERE source_id = ?1 ORDER BY id",
            PAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pages = stmt
            .query_map(params![source_id], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    fn count_pages(&self, source_id: i64) -> StorageResult<PageCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM crawl_pages WHERE source_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![source_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = PageCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            counts.total += count;
            match PageStatus::from_db_string(&status) {
                Some(PageStatus::Pending) => counts.pending += count,
                Some(PageStatus::Fetching) => counts.fetching += count,
                Some(PageStatus::Done) => counts.done += count,
                Some(PageStatus::Failed) => counts.failed += count,
                None => {}
            }
        }
        Ok(counts)
    }

    fn clear_pages(&mut self, source_id: i64) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM crawl_pages WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(deleted as u64)
    }

    fn reset_interrupted_pages(&mut self, source_id: i64) -> StorageResult<u64> {
        let reset = self.conn.execute(
            "UPDATE crawl_pages SET status = ?1 WHERE source_id = ?2 AND status = ?3",
            params![
                PageStatus::Pending.to_db_string(),
                source_id,
                PageStatus::Fetching.to_db_string()
            ],
        )?;
        Ok(reset as u64)
    }

    fn begin_pass(&mut self, source_id: i64) -> StorageResult<u64> {
        let reset = self.conn.execute(
            "UPDATE crawl_pages SET status = ?1, error_message = NULL, document_path = NULL
             WHERE source_id = ?2 AND status = ?3",
            params![
                PageStatus::Pending.to_db_string(),
                source_id,
                PageStatus::Done.to_db_string()
            ],
        )?;
        Ok(reset as u64)
    }

    fn done_document_paths(&self, source_id: i64) -> StorageResult<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT document_path FROM crawl_pages
             WHERE source_id = ?1 AND status = ?2 AND document_path IS NOT NULL",
        )?;
        let paths = stmt
            .query_map(
                params![source_id, PageStatus::Done.to_db_string()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    }

    // ===== Documents =====

    fn upsert_document(&mut self, document: &DocumentUpsert<'_>) -> StorageResult<UpsertOutcome> {
        let tx = self.conn.transaction()?;
        let outcome = upsert_document_row(&tx, document)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn store_document(
        &mut self,
        document: &DocumentUpsert<'_>,
        chunks: &[ChunkDraft],
    ) -> StorageResult<UpsertOutcome> {
        let tx = self.conn.transaction()?;
        let outcome = upsert_document_row(&tx, document)?;
        if outcome.changed {
            tx.execute(
                "DELETE FROM chunks WHERE document_id = ?1",
                params![outcome.id],
            )?;
            insert_chunk_rows(&tx, outcome.id, chunks)?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn get_document(
        &self,
        source_id: i64,
        path: &str,
        version_label: &str,
    ) -> StorageResult<Option<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE source_id = ?1 AND path = ?2 AND version_label = ?3",
            DOCUMENT_COLUMNS
        );
        let document = self
            .conn
            .query_row(&sql, params![source_id, path, version_label], document_from_row)
            .optional()?;
        Ok(document)
    }

    fn list_documents(
        &self,
        source_id: i64,
        version_label: &str,
    ) -> StorageResult<Vec<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE source_id = ?1 AND version_label = ?2 ORDER BY path",
            DOCUMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let documents = stmt
            .query_map(params![source_id, version_label], document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn deactivate_missing_documents(
        &mut self,
        source_id: i64,
        version_label: &str,
        kept: &HashSet<String>,
    ) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id, path FROM documents
                 WHERE source_id = ?1 AND version_label = ?2 AND active = 1",
            )?;
            let rows = stmt.query_map(params![source_id, version_label], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut stale = Vec::new();
            for row in rows {
                let (id, path) = row?;
                if !kept.contains(&path) {
                    stale.push(id);
                }
            }
            stale
        };

        {
            let mut stmt = tx.prepare("UPDATE documents SET active = 0 WHERE id = ?1")?;
            for id in &stale {
                stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(stale.len() as u64)
    }

    // ===== Chunks =====

    fn delete_chunks(&mut self, document_id: i64) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(deleted as u64)
    }

    fn insert_chunks(&mut self, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        insert_chunk_rows(&tx, document_id, chunks)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_chunks(&mut self, document_id: i64, chunks: &[ChunkDraft]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        insert_chunk_rows(&tx, document_id, chunks)?;
        tx.commit()?;
        Ok(())
    }

    fn list_chunks(&self, document_id: i64) -> StorageResult<Vec<ChunkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, ordinal, text, char_start, char_end, heading, hash
             FROM chunks WHERE document_id = ?1 ORDER BY ordinal",
        )?;
        let chunks = stmt
            .query_map(params![document_id], |row| {
                Ok(ChunkRecord {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    ordinal: row.get(2)?,
                    text: row.get(3)?,
                    char_start: row.get::<_, i64>(4)? as usize,
                    char_end: row.get::<_, i64>(5)? as usize,
                    heading: row.get(6)?,
                    hash: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    // ===== Statistics =====

    fn count_documents(&self, source_id: i64) -> StorageResult<(u64, u64)> {
        let (active, inactive): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(active = 1), 0), COALESCE(SUM(active = 0), 0)
             FROM documents WHERE source_id = ?1",
            params![source_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((active as u64, inactive as u64))
    }

    fn count_chunks(&self, source_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use url::Url;

    fn storage_with_source() -> (SqliteStorage, i64) {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let root = Url::parse("https://example.com/docs").unwrap();
        let id = storage.add_web_source(&NewWebSource::new(&root)).unwrap();
        (storage, id)
    }

    fn doc<'a>(source_id: i64, path: &'a str, hash: &'a str) -> DocumentUpsert<'a> {
        DocumentUpsert {
            source_id,
            path,
            uri: "web://example.com/docs",
            title: "Docs",
            hash,
            content_type: "text/markdown",
            version_label: "latest",
            content: "body",
        }
    }

    fn draft(ordinal: u32, text: &str) -> ChunkDraft {
        ChunkDraft {
            ordinal,
            text: text.to_string(),
            char_start: 0,
            char_end: text.len(),
            heading: None,
            hash: format!("h{}", ordinal),
        }
    }

    #[test]
    fn test_source_round_trip() {
        let (storage, id) = storage_with_source();
        let source = storage.get_source(id).unwrap().unwrap();
        assert_eq!(source.root_url.as_deref(), Some("https://example.com/docs"));
        assert_eq!(source.allowed_paths.iter().collect::<Vec<_>>(), vec!["/docs"]);
        assert!(source.require_code_snippets);
        assert_eq!(storage.list_sources().unwrap().len(), 1);
    }

    #[test]
    fn test_update_source_sync() {
        let (mut storage, id) = storage_with_source();
        let status = SyncStatus {
            last_sync_at: Some("2024-01-01T00:00:00Z".to_string()),
            last_error: Some("boom".to_string()),
        };
        storage.update_source_sync(id, &status).unwrap();

        let source = storage.get_source(id).unwrap().unwrap();
        assert_eq!(source.last_error.as_deref(), Some("boom"));

        let result = storage.update_source_sync(999, &status);
        assert!(matches!(result, Err(StorageError::SourceNotFound(999))));
    }

    #[test]
    fn test_upsert_crawl_page_is_unique() {
        let (mut storage, id) = storage_with_source();
        let url = "https://example.com/docs/a";

        assert!(storage.upsert_crawl_page(id, url, url, 1).unwrap());
        assert!(!storage.upsert_crawl_page(id, url, url, 2).unwrap());

        let pages = storage.list_pages(id).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].depth, 1);
        assert_eq!(pages[0].status, PageStatus::Pending);
    }

    #[test]
    fn test_pending_pages_in_creation_order() {
        let (mut storage, id) = storage_with_source();
        for name in ["c", "a", "b"] {
            let url = format!("https://example.com/docs/{}", name);
            storage.upsert_crawl_page(id, &url, &url, 1).unwrap();
        }

        let pending = storage.pending_pages(id, 2).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].url.ends_with("/c"));
        assert!(pending[1].url.ends_with("/a"));
    }

    #[test]
    fn test_count_and_reset_pages() {
        let (mut storage, id) = storage_with_source();
        for name in ["a", "b", "c"] {
            let url = format!("https://example.com/docs/{}", name);
            storage.upsert_crawl_page(id, &url, &url, 1).unwrap();
        }
        let pages = storage.list_pages(id).unwrap();
        storage
            .set_page_status(pages[0].id, PageStatus::Fetching, None)
            .unwrap();
        storage
            .set_page_status(pages[1].id, PageStatus::Done, None)
            .unwrap();

        let counts = storage.count_pages(id).unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.fetching, 1);
        assert_eq!(counts.done, 1);

        assert_eq!(storage.reset_interrupted_pages(id).unwrap(), 1);
        assert_eq!(storage.begin_pass(id).unwrap(), 1);
        assert_eq!(storage.count_pages(id).unwrap().pending, 3);

        assert_eq!(storage.clear_pages(id).unwrap(), 3);
        assert_eq!(storage.count_pages(id).unwrap(), PageCounts::default());
    }

    #[test]
    fn test_terminal_status_stamps_crawl_time() {
        let (mut storage, id) = storage_with_source();
        let url = "https://example.com/docs";
        storage.upsert_crawl_page(id, url, url, 0).unwrap();
        let page = &storage.list_pages(id).unwrap()[0];

        storage
            .set_page_status(page.id, PageStatus::Failed, Some("HTTP 500"))
            .unwrap();

        let page = &storage.list_pages(id).unwrap()[0];
        assert_eq!(page.status, PageStatus::Failed);
        assert_eq!(page.error_message.as_deref(), Some("HTTP 500"));
        assert!(page.last_crawled_at.is_some());
    }

    #[test]
    fn test_done_document_paths() {
        let (mut storage, id) = storage_with_source();
        let url = "https://example.com/docs";
        storage.upsert_crawl_page(id, url, url, 0).unwrap();
        let page_id = storage.list_pages(id).unwrap()[0].id;

        storage.set_page_status(page_id, PageStatus::Done, None).unwrap();
        storage.set_page_document_path(page_id, Some("/docs")).unwrap();

        let paths = storage.done_document_paths(id).unwrap();
        assert!(paths.contains("/docs"));
    }

    #[test]
    fn test_upsert_document_reports_changes() {
        let (mut storage, id) = storage_with_source();

        let first = storage.upsert_document(&doc(id, "/docs", "aaa")).unwrap();
        assert!(first.changed);

        let same = storage.upsert_document(&doc(id, "/docs", "aaa")).unwrap();
        assert_eq!(same.id, first.id);
        assert!(!same.changed);

        let changed = storage.upsert_document(&doc(id, "/docs", "bbb")).unwrap();
        assert_eq!(changed.id, first.id);
        assert!(changed.changed);

        let stored = storage.get_document(id, "/docs", "latest").unwrap().unwrap();
        assert_eq!(stored.content_hash, "bbb");
    }

    #[test]
    fn test_deactivate_missing_documents() {
        let (mut storage, id) = storage_with_source();
        storage.upsert_document(&doc(id, "/docs/a", "1")).unwrap();
        storage.upsert_document(&doc(id, "/docs/b", "2")).unwrap();

        let kept: HashSet<String> = ["/docs/a".to_string()].into_iter().collect();
        assert_eq!(
            storage
                .deactivate_missing_documents(id, "latest", &kept)
                .unwrap(),
            1
        );

        let b = storage.get_document(id, "/docs/b", "latest").unwrap().unwrap();
        assert!(!b.active);
        assert_eq!(storage.count_documents(id).unwrap(), (1, 1));

        // Re-fetching reactivates
        storage.upsert_document(&doc(id, "/docs/b", "2")).unwrap();
        let b = storage.get_document(id, "/docs/b", "latest").unwrap().unwrap();
        assert!(b.active);
    }

    #[test]
    fn test_replace_chunks() {
        let (mut storage, id) = storage_with_source();
        let document = storage.upsert_document(&doc(id, "/docs", "1")).unwrap();

        storage
            .insert_chunks(document.id, &[draft(0, "one"), draft(1, "two")])
            .unwrap();
        assert_eq!(storage.count_chunks(id).unwrap(), 2);

        storage.replace_chunks(document.id, &[draft(0, "fresh")]).unwrap();
        let chunks = storage.list_chunks(document.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "fresh");
    }

    #[test]
    fn test_store_document_skips_chunks_when_unchanged() {
        let (mut storage, id) = storage_with_source();
        let first = storage
            .store_document(&doc(id, "/docs", "1"), &[draft(0, "one")])
            .unwrap();
        assert!(first.changed);

        let again = storage
            .store_document(&doc(id, "/docs", "1"), &[draft(0, "ignored")])
            .unwrap();
        assert!(!again.changed);

        let chunks = storage.list_chunks(first.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "one");
    }

    #[test]
    fn test_remove_source_cascades() {
        let (mut storage, id) = storage_with_source();
        let url = "https://example.com/docs";
        storage.upsert_crawl_page(id, url, url, 0).unwrap();
        let document = storage.upsert_document(&doc(id, "/docs", "1")).unwrap();
        storage.insert_chunks(document.id, &[draft(0, "one")]).unwrap();

        assert!(storage.remove_source(id).unwrap());
        assert!(!storage.remove_source(id).unwrap());
        assert!(storage.get_source(id).unwrap().is_none());
        assert!(storage.list_pages(id).unwrap().is_empty());
        assert!(storage.list_chunks(document.id).unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("librarian.db");
        let mut storage = SqliteStorage::open(&path).unwrap();
        let root = Url::parse("https://example.com/").unwrap();
        storage.add_web_source(&NewWebSource::new(&root)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_recoverable_error_classification() {
        let short_read = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR_SHORT_READ),
            None,
        ));
        assert!(is_recoverable(&short_read));

        let by_message = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some("disk I/O error".to_string()),
        ));
        assert!(is_recoverable(&by_message));

        let busy = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(!is_recoverable(&busy));
        assert!(!is_recoverable(&StorageError::LockPoisoned));
    }

    #[test]
    fn test_recovery_recreates_files_and_retries_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("librarian.db");
        std::fs::write(&path, b"garbage").unwrap();
        std::fs::write(with_suffix(&path, "-wal"), b"garbage").unwrap();

        let mut attempts = 0;
        let storage = SqliteStorage::open_with_recovery(&path, |p| {
            attempts += 1;
            if attempts == 1 {
                Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR_SHORT_READ),
                    None,
                )))
            } else {
                assert!(!p.exists());
                assert!(!with_suffix(p, "-wal").exists());
                SqliteStorage::open_once(p)
            }
        });

        assert!(storage.is_ok());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_unrecoverable_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("librarian.db");

        let mut attempts = 0;
        let result = SqliteStorage::open_with_recovery(&path, |_| {
            attempts += 1;
            Err(StorageError::LockPoisoned)
        });

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
