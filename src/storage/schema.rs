//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Librarian database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Registered documentation sources
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL DEFAULT 'web',
    name TEXT NOT NULL,
    root_url TEXT,
    allowed_paths TEXT NOT NULL DEFAULT '[]',
    denied_paths TEXT NOT NULL DEFAULT '[]',
    max_depth INTEGER NOT NULL,
    max_pages INTEGER NOT NULL,
    version_label TEXT,
    force_headless INTEGER NOT NULL DEFAULT 0,
    require_code_snippets INTEGER NOT NULL DEFAULT 1,
    last_sync_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL
);

-- One row per URL per source
CREATE TABLE IF NOT EXISTS crawl_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    status TEXT NOT NULL,
    last_crawled_at TEXT,
    error_message TEXT,
    document_path TEXT,
    UNIQUE(source_id, normalized_url)
);

CREATE INDEX IF NOT EXISTS idx_crawl_pages_status ON crawl_pages(source_id, status);

-- Stored content, one row per (source, path, version)
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    uri TEXT NOT NULL,
    title TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    content_type TEXT NOT NULL,
    version_label TEXT NOT NULL,
    content TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    UNIQUE(source_id, path, version_label)
);

CREATE INDEX IF NOT EXISTS idx_documents_active ON documents(source_id, version_label, active);

-- Search-unit fragments of a document
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    heading TEXT,
    hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, ordinal);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
