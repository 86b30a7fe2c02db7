//! Full-text and similarity queries
//!
//! FTS results carry highlight/snippet markup produced with random boundary
//! tokens chosen per request; `parse_highlights` turns the raw strings into
//! `Match` runs so callers never see the tokens.

use super::Store;
use crate::error::Result;
use crate::models::{FtsResult, ItemStatus, Match, SimilarityResult};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::Row;
use uuid::Uuid;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").unwrap());

/// BM25 weights for (source, url, title, description, content); the title
/// carries the boost. Shared with the hybrid query so both rank alike.
pub(crate) const BM25_WEIGHTS: &str = "1.0, 1.0, 3.0, 0.8, 1.0";

/// Turn free-form input into an FTS5 query: each word quoted, with a `*` on
/// the last token so partial words still match.
///
/// `escape("Hello, world!")` == `"Hello" "world"*`
pub fn escape(query: &str) -> String {
    let words: Vec<&str> = NON_WORD
        .split(query)
        .filter(|word| !word.is_empty())
        .collect();

    format!("\"{}\"*", words.join("\" \""))
}

/// Parse highlight/snippet output into runs of highlighted and plain text.
///
/// Text between `start` and `end` becomes a highlighted `Match`; everything
/// else is plain. Input missing a closing `end` is truncated at the last
/// well-formed run.
pub fn parse_highlights(input: &str, start: &str, end: &str) -> Vec<Match> {
    let mut matches = Vec::with_capacity(3);
    let mut input = input;

    loop {
        if input.is_empty() {
            return matches;
        }

        let Some(start_index) = input.find(start) else {
            matches.push(Match {
                highlighted: false,
                content: input.to_string(),
            });
            return matches;
        };

        if start_index > 0 {
            matches.push(Match {
                highlighted: false,
                content: input[..start_index].to_string(),
            });
            input = &input[start_index..];
            continue;
        }

        let rest = &input[start.len()..];
        let Some(end_index) = rest.find(end) else {
            // Malformed input; bail with what parsed cleanly
            return matches;
        };

        matches.push(Match {
            highlighted: true,
            content: rest[..end_index].to_string(),
        });
        input = &rest[end_index + end.len()..];
    }
}

fn source_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Store {
    /// BM25-ranked full-text search over Finished pages, with pagination.
    ///
    /// Returns the page of results plus the total row count under the same
    /// WHERE clause.
    pub async fn search(
        &self,
        sources: &[String],
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<FtsResult>, u32)> {
        if sources.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let start = Uuid::new_v4().to_string();
        let end = Uuid::new_v4().to_string();
        let escaped = escape(query);

        let sql = format!(
            r#"
            SELECT
                pages_fts.rank AS rank,
                pages.url AS url,
                highlight(pages_fts, 2, ?, ?) AS title,
                snippet(pages_fts, 3, ?, ?, '…', 8) AS description,
                snippet(pages_fts, 4, ?, ?, '…', 24) AS content
            FROM pages
            JOIN pages_fts ON pages.id = pages_fts.rowid
            WHERE pages.source IN ({placeholders})
                AND pages.status = ?
                AND pages_fts MATCH ?
            ORDER BY bm25(pages_fts, {BM25_WEIGHTS}) LIMIT ? OFFSET ?
            "#,
            placeholders = source_placeholders(sources.len())
        );

        let mut fts_query = sqlx::query(&sql)
            .bind(&start)
            .bind(&end)
            .bind(&start)
            .bind(&end)
            .bind(&start)
            .bind(&end);
        for source in sources {
            fts_query = fts_query.bind(source);
        }
        fts_query = fts_query
            .bind(ItemStatus::Finished)
            .bind(&escaped)
            .bind(page_size as i64)
            .bind(page.saturating_sub(1) as i64 * page_size as i64);

        let rows = fts_query.fetch_all(self.pool()).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(FtsResult {
                rank: row.try_get("rank")?,
                url: row.try_get("url")?,
                title: parse_highlights(row.try_get("title")?, &start, &end),
                description: parse_highlights(row.try_get("description")?, &start, &end),
                content: parse_highlights(row.try_get("content")?, &start, &end),
            });
        }

        let count_sql = format!(
            r#"
            SELECT COUNT(*) FROM pages
            JOIN pages_fts ON pages.id = pages_fts.rowid
            WHERE pages.source IN ({placeholders})
                AND pages.status = ?
                AND pages_fts MATCH ?
            "#,
            placeholders = source_placeholders(sources.len())
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for source in sources {
            count_query = count_query.bind(source);
        }
        let total = count_query
            .bind(ItemStatus::Finished)
            .bind(&escaped)
            .fetch_one(self.pool())
            .await?;

        Ok((results, total as u32))
    }

    /// Nearest-neighbor search over one source's vector table, restricted to
    /// Finished pages and ordered by ascending distance.
    pub async fn similarity_search(
        &self,
        source_id: &str,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<SimilarityResult>> {
        super::validate_source_id(source_id)?;
        let serialized = super::serialize_vector(query);

        let sql = format!(
            r#"
            SELECT pages_vec_{src}.distance AS distance, pages.url AS url,
                   pages.title AS title, vec_chunks.chunk AS chunk
            FROM pages_vec_{src}
            JOIN vec_chunks USING (id)
            JOIN pages ON pages.id = vec_chunks.page
            WHERE pages_vec_{src}.embedding MATCH ?
                AND k = ?
                AND pages.status = ?
            ORDER BY pages_vec_{src}.distance
            LIMIT ?
            "#,
            src = source_id
        );

        let rows = sqlx::query(&sql)
            .bind(serialized)
            .bind(limit)
            .bind(ItemStatus::Finished)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(SimilarityResult {
                similarity: row.try_get("distance")?,
                url: row.try_get("url")?,
                title: row.try_get("title")?,
                chunk: row.try_get("chunk")?,
            });
        }

        Ok(results)
    }
}
