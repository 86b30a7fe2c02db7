//! Crawl and embedding queue state machines
//!
//! Both queues share the same lifecycle: rows start Pending, are claimed into
//! Processing by an atomic `UPDATE .. RETURNING`, and are deleted on Finished
//! or left in Error. A Processing row whose `updated_at` ages past the lease
//! timeout is reclaimed by `cleanup()`.

use super::Store;
use crate::chunk;
use crate::error::Result;
use crate::models::{EmbedQueueItem, ItemStatus, QueueItem};
use sqlx::FromRow;

/// Seconds a Processing row may go without updates before its lease expires
const LEASE_TIMEOUT_SECS: i64 = 60;

#[derive(FromRow)]
struct QueueRow {
    id: i64,
    source: String,
    url: String,
    depth: i64,
    is_refresh: bool,
    status: ItemStatus,
    added_at: String,
    updated_at: String,
}

impl Store {
    /// Enqueue URLs for a source, one transaction for the whole batch.
    ///
    /// Enqueueing an already-queued URL is idempotent and preserves the
    /// existing row's depth and status. If the referrer URL resolves to an
    /// indexed page, it is recorded against each queue row so the eventual
    /// page upsert can restore inbound edges.
    pub async fn add_to_queue(
        &self,
        source: &str,
        referrer: &str,
        urls: &[String],
        depth: i64,
        is_refresh: bool,
    ) -> Result<()> {
        let referrer_page = if referrer.is_empty() {
            None
        } else {
            self.get_document(source, referrer).await?
        };

        let mut tx = self.pool().begin().await?;

        for url in urls {
            // The no-op ON CONFLICT update makes sure the id comes back even
            // when the row already exists.
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO crawl_queue (source, url, depth, is_refresh)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(source, url) DO UPDATE SET url = url
                RETURNING id
                "#,
            )
            .bind(source)
            .bind(url)
            .bind(depth)
            .bind(is_refresh)
            .fetch_one(&mut *tx)
            .await?;

            if let Some(page) = &referrer_page {
                sqlx::query(
                    r#"
                    INSERT INTO crawl_queue_referrers (queue_item, referrer)
                    VALUES (?, ?) ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(id)
                .bind(page.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Atomically claim the oldest Pending row for a source.
    ///
    /// Returns `None` when the queue is empty or another worker won the race;
    /// neither case is an error.
    pub async fn pop_queue(&self, source: &str) -> Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE crawl_queue SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = (
                SELECT id FROM crawl_queue WHERE status = ? AND source = ?
                ORDER BY added_at LIMIT 1
            )
            RETURNING id, source, url, depth, is_refresh, status, added_at, updated_at
            "#,
        )
        .bind(ItemStatus::Processing)
        .bind(ItemStatus::Pending)
        .bind(source)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let referrers: Vec<i64> =
            sqlx::query_scalar("SELECT referrer FROM crawl_queue_referrers WHERE queue_item = ?")
                .bind(row.id)
                .fetch_all(self.pool())
                .await?;

        Ok(Some(QueueItem {
            id: row.id,
            source: row.source,
            url: row.url,
            depth: row.depth,
            is_refresh: row.is_refresh,
            status: row.status,
            added_at: row.added_at,
            updated_at: row.updated_at,
            referrers,
        }))
    }

    /// Advance a crawl queue row; Finished rows are deleted immediately
    pub async fn update_queue_entry(&self, id: i64, status: ItemStatus) -> Result<()> {
        if status == ItemStatus::Finished {
            sqlx::query("DELETE FROM crawl_queue WHERE id = ?")
                .bind(id)
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query(
                "UPDATE crawl_queue SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(status)
            .bind(id)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// Re-queue every page of a source older than `days_ago` days.
    ///
    /// The referrer is left blank: the page row already carries its inbound
    /// edges, and the crawl tick only rebuilds outbound ones.
    pub async fn queue_pages_older_than(&self, source: &str, days_ago: i64) -> Result<()> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT url, depth FROM pages
            WHERE source = ?
              AND url NOT IN (SELECT url FROM crawl_queue WHERE source = ?)
              AND unixepoch() - unixepoch(crawled_at) > ?
            "#,
        )
        .bind(source)
        .bind(source)
        .bind(days_ago * 86_400)
        .fetch_all(self.pool())
        .await?;

        for (url, depth) in rows {
            self.add_to_queue(source, "", &[url], depth, true).await?;
        }

        Ok(())
    }

    // ===== Embedding queue =====

    /// Replace a page's pending chunks with a fresh ordered set, atomically
    pub async fn add_to_embed_queue(&self, page_id: i64, chunks: &[String]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM embed_queue WHERE page = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            sqlx::query("INSERT INTO embed_queue (page, chunk_index, chunk) VALUES (?, ?, ?)")
                .bind(page_id)
                .bind(index as i64)
                .bind(chunk)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Atomically claim up to `limit` of the oldest Pending chunks whose page
    /// belongs to `source`.
    pub async fn pop_embed_queue(&self, limit: i64, source: &str) -> Result<Vec<EmbedQueueItem>> {
        let items = sqlx::query_as::<_, EmbedQueueItem>(
            r#"
            UPDATE embed_queue SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id IN (
                SELECT embed_queue.id FROM embed_queue
                JOIN pages ON embed_queue.page = pages.id
                WHERE embed_queue.status = ? AND pages.source = ?
                ORDER BY embed_queue.added_at LIMIT ?
            )
            RETURNING id, status, page AS page_id, chunk_index, chunk
            "#,
        )
        .bind(ItemStatus::Processing)
        .bind(ItemStatus::Pending)
        .bind(source)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(items)
    }

    /// Advance an embed queue row; Finished rows are deleted immediately
    pub async fn update_embed_queue_entry(&self, id: i64, status: ItemStatus) -> Result<()> {
        if status == ItemStatus::Finished {
            sqlx::query("DELETE FROM embed_queue WHERE id = ?")
                .bind(id)
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query(
                "UPDATE embed_queue SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(status)
            .bind(id)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// Insert an embedded chunk and its vector in one transaction.
    /// The vec_chunks row and the ANN row share the same id.
    pub async fn add_embedding(
        &self,
        page_id: i64,
        source_id: &str,
        chunk_index: i64,
        chunk: &str,
        vector: &[f32],
    ) -> Result<()> {
        super::validate_source_id(source_id)?;
        let serialized = super::serialize_vector(vector);

        let mut tx = self.pool().begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO vec_chunks (page, chunk_index, chunk) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(page_id)
        .bind(chunk_index)
        .bind(chunk)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "INSERT INTO pages_vec_{source_id} (id, embedding) VALUES (?, ?)"
        ))
        .bind(id)
        .bind(serialized)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Queue chunks for every Finished page of a source that has no
    /// embeddings yet and is not already queued.
    pub async fn start_embeddings(
        &self,
        source: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<()> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, content FROM pages
            WHERE source = ? AND status = ?
              AND id NOT IN (SELECT page FROM vec_chunks)
              AND id NOT IN (SELECT page FROM embed_queue)
            "#,
        )
        .bind(source)
        .bind(ItemStatus::Finished)
        .fetch_all(self.pool())
        .await?;

        for (id, content) in rows {
            let chunks: Vec<String> = chunk::chunk_text(&content, chunk_size, chunk_overlap)
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect();

            self.add_to_embed_queue(id, &chunks).await?;
        }

        Ok(())
    }

    /// Reclaim leaked leases and clear residual rows from both queues
    pub async fn cleanup(&self) -> Result<()> {
        // Finished rows are deleted on update; these are sanity sweeps.
        sqlx::query("DELETE FROM crawl_queue WHERE status = ?")
            .bind(ItemStatus::Finished)
            .execute(self.pool())
            .await?;

        sqlx::query(
            r#"
            UPDATE crawl_queue SET status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE status = ? AND unixepoch() - unixepoch(updated_at) > ?
            "#,
        )
        .bind(ItemStatus::Pending)
        .bind(ItemStatus::Processing)
        .bind(LEASE_TIMEOUT_SECS)
        .execute(self.pool())
        .await?;

        sqlx::query("DELETE FROM embed_queue WHERE status = ?")
            .bind(ItemStatus::Finished)
            .execute(self.pool())
            .await?;

        // Failed embed batches get another attempt once their lease ages out.
        sqlx::query(
            r#"
            UPDATE embed_queue SET status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE status IN (?, ?) AND unixepoch() - unixepoch(updated_at) > ?
            "#,
        )
        .bind(ItemStatus::Pending)
        .bind(ItemStatus::Error)
        .bind(ItemStatus::Processing)
        .bind(LEASE_TIMEOUT_SECS)
        .execute(self.pool())
        .await?;

        // Orphans cannot appear while foreign keys hold, but sweep anyway.
        sqlx::query("DELETE FROM embed_queue WHERE page NOT IN (SELECT id FROM pages)")
            .execute(self.pool())
            .await?;

        Ok(())
    }
}
