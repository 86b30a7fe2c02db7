//! Durable state backed by a single SQLite database
//!
//! This module owns every SQL statement in the crate:
//! - the pages table, referrer graph, and canonical mappings
//! - the crawl and embedding queues (see `queue`)
//! - FTS, similarity, and hybrid query assembly (see `search` / `hybrid`)
//! - the spelling-correction vocabulary (see `spellfix`)
//!
//! The database opens in WAL mode so readers are not blocked by the crawl
//! workers, and the `sqlite-vec` extension is registered process-wide before
//! the first connection is made.

mod hybrid;
mod queue;
mod schema;
mod search;
mod spellfix;

pub use search::escape;
pub use search::parse_highlights;

use crate::error::{Error, Result};
use crate::models::{Canonical, ItemStatus, Page};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Once;
use tracing::debug;

static VEC_EXTENSION: Once = Once::new();

/// Register `sqlite-vec` for every future SQLite connection in this process.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut libsqlite3_sys::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const libsqlite3_sys::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    });
}

/// Encode a query or chunk vector into the blob format vec0 accepts
pub(crate) fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Handle to the embedded store; cheap to clone
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and connect a pool
    pub async fn open(path: &Path) -> Result<Self> {
        register_vec_extension();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        debug!("Connecting to SQLite database at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the base schema idempotently
    pub async fn setup(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Create a source's vector table with a fixed dimension
    pub async fn setup_vector(&self, source_id: &str, dimensions: usize) -> Result<()> {
        validate_source_id(source_id)?;
        sqlx::raw_sql(&schema::vector_setup_sql(source_id, dimensions))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop a source's vector table and triggers
    pub async fn drop_vector(&self, source_id: &str) -> Result<()> {
        validate_source_id(source_id)?;
        sqlx::raw_sql(&schema::vector_drop_sql(source_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Documents =====

    /// Upsert a page by (source, url) and record its referrers, atomically.
    ///
    /// Re-crawls keep the existing row id, so referrer rows inserted in the
    /// same transaction always reference a live page.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_document(
        &self,
        source: &str,
        depth: i64,
        referrers: &[i64],
        url: &str,
        status: ItemStatus,
        title: &str,
        description: &str,
        content: &str,
        error_info: &str,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pages (source, depth, status, url, title, description, content, error_info)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, url) DO UPDATE SET
                depth = excluded.depth,
                status = excluded.status,
                title = excluded.title,
                description = excluded.description,
                content = excluded.content,
                error_info = excluded.error_info,
                crawled_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
        )
        .bind(source)
        .bind(depth)
        .bind(status)
        .bind(url)
        .bind(title)
        .bind(description)
        .bind(content)
        .bind(error_info)
        .fetch_one(&mut *tx)
        .await?;

        for referrer in referrers {
            sqlx::query(
                "INSERT INTO pages_referrers (source, dest) VALUES (?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(referrer)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Whether a page exists under the URL directly or via a canonical alias
    pub async fn has_document(&self, source: &str, url: &str) -> Result<bool> {
        let row: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM pages
            WHERE source = ? AND (
                url = ? OR url IN (SELECT canonical FROM canonicals WHERE source = ? AND url = ?)
            )
            "#,
        )
        .bind(source)
        .bind(url)
        .bind(source)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Fetch a page by URL or by a canonical alias of the URL
    pub async fn get_document(&self, source: &str, url: &str) -> Result<Option<Page>> {
        let page = sqlx::query_as::<_, Page>(
            r#"
            SELECT id, source, url, title, description, content, depth, crawled_at, status, error_info
            FROM pages
            WHERE source = ? AND (
                url = ? OR url IN (SELECT canonical FROM canonicals WHERE source = ? AND url = ?)
            )
            "#,
        )
        .bind(source)
        .bind(url)
        .bind(source)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(page)
    }

    pub async fn get_document_by_id(&self, id: i64) -> Result<Option<Page>> {
        let page = sqlx::query_as::<_, Page>(
            r#"
            SELECT id, source, url, title, description, content, depth, crawled_at, status, error_info
            FROM pages WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(page)
    }

    /// Delete a page; canonicals pointing at it and incident referrer edges
    /// are removed by trigger and foreign-key cascade.
    pub async fn remove_document(&self, source: &str, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM pages WHERE source = ? AND url = ?")
            .bind(source)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Referrer graph =====

    pub async fn add_referrer(&self, source: i64, dest: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO pages_referrers (source, dest) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(source)
        .bind(dest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_referrer(&self, source: i64, dest: i64) -> Result<()> {
        sqlx::query("DELETE FROM pages_referrers WHERE source = ? AND dest = ?")
            .bind(source)
            .bind(dest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every outbound edge of a page. Inbound edges are untouched;
    /// the crawl tick rebuilds outbound edges after each successful fetch.
    pub async fn remove_all_references(&self, source: i64) -> Result<()> {
        sqlx::query("DELETE FROM pages_referrers WHERE source = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Page ids that this page links to
    pub async fn get_references(&self, page_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT dest FROM pages_referrers WHERE source = ?")
            .bind(page_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Page ids that link to this page
    pub async fn get_referrers(&self, page_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT source FROM pages_referrers WHERE dest = ?")
            .bind(page_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Pages with no inbound edges. Usually candidates for deletion, unless
    /// they are a source's base URL.
    pub async fn list_orphan_pages(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM pages WHERE id NOT IN (SELECT dest FROM pages_referrers)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ===== Canonicals =====

    pub async fn get_canonical(&self, source: &str, url: &str) -> Result<Option<Canonical>> {
        let canonical = sqlx::query_as::<_, Canonical>(
            "SELECT id, url, canonical, crawled_at FROM canonicals WHERE source = ? AND url = ?",
        )
        .bind(source)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(canonical)
    }

    pub async fn set_canonical(&self, source: &str, url: &str, canonical: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO canonicals (source, url, canonical) VALUES (?, ?, ?)
            ON CONFLICT(source, url) DO UPDATE SET canonical = excluded.canonical
            "#,
        )
        .bind(source)
        .bind(url)
        .bind(canonical)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Source ids end up in table names, so reject anything outside the
/// configured alphabet even if the config layer already checked.
pub(crate) fn validate_source_id(source_id: &str) -> Result<()> {
    if !source_id.is_empty()
        && source_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid source ID: {source_id}")))
    }
}
