//! SQLite schema definition
//!
//! The FTS5 index is an external-content table kept in sync with `pages`
//! through triggers. Per-source vector tables are created separately once the
//! source's embedding dimension is known.

/// Base schema, executed idempotently at startup
pub const SCHEMA_SQL: &str = r#"
-- Pages: one row per canonical URL per source
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    depth INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    status INTEGER NOT NULL,
    error_info TEXT NOT NULL DEFAULT '',
    UNIQUE (source, url)
);

-- Directed referrer graph: "source page links to dest page"
CREATE TABLE IF NOT EXISTS pages_referrers (
    source INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    dest INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    PRIMARY KEY (source, dest)
);

-- Memoized original -> canonical URL mappings
CREATE TABLE IF NOT EXISTS canonicals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    canonical TEXT NOT NULL,
    crawled_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (source, url)
);

-- Crawl queue; (source, url) is unique so re-enqueueing is idempotent
CREATE TABLE IF NOT EXISTS crawl_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    is_refresh INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (source, url)
);

CREATE TABLE IF NOT EXISTS crawl_queue_referrers (
    queue_item INTEGER NOT NULL REFERENCES crawl_queue(id) ON DELETE CASCADE,
    referrer INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    PRIMARY KEY (queue_item, referrer)
);

-- Embedding queue: chunks waiting to be embedded, FIFO by added_at
CREATE TABLE IF NOT EXISTS embed_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    chunk TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Embedded chunks; the per-source vector tables key off this id
CREATE TABLE IF NOT EXISTS vec_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    chunk TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_source ON pages(source);
CREATE INDEX IF NOT EXISTS idx_crawl_queue_pop ON crawl_queue(source, status, added_at);
CREATE INDEX IF NOT EXISTS idx_embed_queue_page ON embed_queue(page);
CREATE INDEX IF NOT EXISTS idx_vec_chunks_page ON vec_chunks(page);

-- Full-text index over the pages table (external content)
CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
    source UNINDEXED, url, title, description, content,
    content=pages, content_rowid=id
);

CREATE TRIGGER IF NOT EXISTS pages_ai AFTER INSERT ON pages BEGIN
    INSERT INTO pages_fts(rowid, source, url, title, description, content)
    VALUES (NEW.id, NEW.source, NEW.url, NEW.title, NEW.description, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS pages_ad AFTER DELETE ON pages BEGIN
    INSERT INTO pages_fts(pages_fts, rowid, source, url, title, description, content)
    VALUES ('delete', OLD.id, OLD.source, OLD.url, OLD.title, OLD.description, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS pages_au AFTER UPDATE ON pages BEGIN
    INSERT INTO pages_fts(pages_fts, rowid, source, url, title, description, content)
    VALUES ('delete', OLD.id, OLD.source, OLD.url, OLD.title, OLD.description, OLD.content);
    INSERT INTO pages_fts(rowid, source, url, title, description, content)
    VALUES (NEW.id, NEW.source, NEW.url, NEW.title, NEW.description, NEW.content);
END;

-- Deleting a page invalidates canonicals that point at it
CREATE TRIGGER IF NOT EXISTS pages_delete_canonicals AFTER DELETE ON pages BEGIN
    DELETE FROM canonicals WHERE source = OLD.source AND canonical = OLD.url;
END;
"#;

/// DDL for a source's vector table and its maintenance triggers.
///
/// The source id is interpolated into identifiers; callers must have
/// validated it against `[A-Za-z0-9_]+` first. The dimension is fixed here
/// and enforced by the vec0 table from then on.
pub fn vector_setup_sql(source_id: &str, dimensions: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS pages_vec_{src} USING vec0(
    id INTEGER PRIMARY KEY,
    embedding FLOAT[{dim}] distance_metric=cosine
);

CREATE TRIGGER IF NOT EXISTS vec_chunks_delete_embedding_{src} AFTER DELETE ON vec_chunks BEGIN
    DELETE FROM pages_vec_{src} WHERE id = OLD.id;
END;

-- Re-crawled content invalidates the page's chunks so it gets re-embedded
CREATE TRIGGER IF NOT EXISTS pages_refresh_embeddings_{src}
AFTER UPDATE OF content ON pages
WHEN OLD.source = '{src}' AND OLD.content IS NOT NEW.content
BEGIN
    DELETE FROM vec_chunks WHERE page = OLD.id;
END;
"#,
        src = source_id,
        dim = dimensions
    )
}

/// DDL removing a source's vector table and triggers
pub fn vector_drop_sql(source_id: &str) -> String {
    format!(
        r#"
DROP TABLE IF EXISTS pages_vec_{src};
DROP TRIGGER IF EXISTS vec_chunks_delete_embedding_{src};
DROP TRIGGER IF EXISTS pages_refresh_embeddings_{src};
"#,
        src = source_id
    )
}
