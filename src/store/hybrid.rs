//! Reciprocal-rank-fusion hybrid query
//!
//! One SQL statement fuses the FTS ranking with one vector ranking per
//! selected source: each list contributes `1/(60 + rank)` (vector lists
//! weighted by 0.5), and rows are ordered by the combined score.
//!
//! Values are always bound as parameters; only `pages_vec_<id>` identifiers
//! are interpolated, and source ids are validated against `[A-Za-z0-9_]+`
//! before assembly.

use super::search::{escape, parse_highlights, BM25_WEIGHTS};
use super::Store;
use crate::error::Result;
use crate::models::{HybridResult, ItemStatus};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// RRF smoothing constant
const RRF_K: u32 = 60;

/// Weight applied to each per-source vector list relative to FTS
const VEC_WEIGHT: f64 = 0.5;

fn coalesce(args: &[String]) -> String {
    if args.len() == 1 {
        args[0].clone()
    } else {
        format!("coalesce({})", args.join(", "))
    }
}

/// Assemble the hybrid query for the given FTS sources and vector sources.
fn build_query(vec_sources: &[&String], fts_source_count: usize) -> String {
    let mut sql = String::from("WITH ");

    // One CTE per vector source: the best chunk per page, ranked by distance.
    for src in vec_sources {
        sql.push_str(&format!(
            r#"vec_subquery_{src} AS (
    SELECT page, chunk, distance,
           row_number() OVER (ORDER BY distance) AS rank_number
    FROM (
        SELECT vec_chunks.page AS page, vec_chunks.chunk AS chunk,
               pages_vec_{src}.distance AS distance,
               row_number() OVER (
                   PARTITION BY vec_chunks.page ORDER BY pages_vec_{src}.distance
               ) AS chunk_rank
        FROM pages_vec_{src}
        JOIN vec_chunks USING (id)
        WHERE pages_vec_{src}.embedding MATCH ? AND k = ?
    )
    WHERE chunk_rank = 1
), "#
        ));
    }

    let placeholders = vec!["?"; fts_source_count].join(", ");
    sql.push_str(&format!(
        r#"fts_subquery AS (
    SELECT
        pages_fts.rowid AS page,
        highlight(pages_fts, 2, ?, ?) AS title,
        snippet(pages_fts, 3, ?, ?, '…', 8) AS description,
        snippet(pages_fts, 4, ?, ?, '…', 24) AS content,
        bm25(pages_fts, {BM25_WEIGHTS}) AS rank
    FROM pages_fts
    JOIN pages ON pages.id = pages_fts.rowid
    WHERE pages.source IN ({placeholders})
        AND pages.status = ?
        AND pages_fts MATCH ?
    ORDER BY rank
    LIMIT ?
), fts_ordered AS (
    SELECT *, row_number() OVER (ORDER BY rank) AS rank_number
    FROM fts_subquery
)
"#
    ));

    let mut content_args = vec!["fts_ordered.content".to_string()];
    let mut page_args = vec!["fts_ordered.page".to_string()];
    let mut distance_args = Vec::new();
    let mut vec_rank_args = Vec::new();
    let mut combined_terms = Vec::new();

    for src in vec_sources {
        content_args.push(format!("vec_subquery_{src}.chunk"));
        page_args.push(format!("vec_subquery_{src}.page"));
        distance_args.push(format!("vec_subquery_{src}.distance"));
        vec_rank_args.push(format!("vec_subquery_{src}.rank_number"));
        combined_terms.push(format!(
            "coalesce(1.0 / ({RRF_K} + vec_subquery_{src}.rank_number) * {VEC_WEIGHT}, 0.0)"
        ));
    }
    combined_terms.push(format!(
        "coalesce(1.0 / ({RRF_K} + fts_ordered.rank_number), 0.0)"
    ));

    let vec_distance = if distance_args.is_empty() {
        "NULL".to_string()
    } else {
        coalesce(&distance_args)
    };
    let vec_rank = if vec_rank_args.is_empty() {
        "NULL".to_string()
    } else {
        coalesce(&vec_rank_args)
    };

    sql.push_str(&format!(
        r#"SELECT
    pages.url AS url,
    coalesce(fts_ordered.title, pages.title) AS title,
    coalesce(fts_ordered.description, pages.description) AS description,
    {content} AS content,
    {vec_distance} AS vec_distance,
    {vec_rank} AS vec_rank,
    fts_ordered.rank_number AS fts_rank,
    ({combined}) AS combined_rank
FROM fts_ordered
"#,
        content = coalesce(&content_args),
        combined = combined_terms.join(" + "),
    ));

    for src in vec_sources {
        sql.push_str(&format!("FULL OUTER JOIN vec_subquery_{src} USING (page)\n"));
    }

    sql.push_str(&format!(
        "JOIN pages ON pages.id = {}\nORDER BY combined_rank DESC",
        coalesce(&page_args)
    ));

    sql
}

impl Store {
    /// Run the fused FTS + vector query over the selected sources.
    ///
    /// `embedded_queries` maps source id → query vector; vector CTEs are
    /// emitted only for sources that have one (a source without embeddings
    /// has no ANN table to reference). Sources missing from the map still
    /// participate through the FTS term.
    pub async fn hybrid_search(
        &self,
        sources: &[String],
        query: &str,
        embedded_queries: &HashMap<String, Vec<f32>>,
        limit: i64,
    ) -> Result<Vec<HybridResult>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        for source in sources {
            super::validate_source_id(source)?;
        }

        let vec_sources: Vec<&String> = sources
            .iter()
            .filter(|s| embedded_queries.contains_key(s.as_str()))
            .collect();

        let sql = build_query(&vec_sources, sources.len());

        let start = Uuid::new_v4().to_string();
        let end = Uuid::new_v4().to_string();

        let mut db_query = sqlx::query(&sql);

        for src in &vec_sources {
            let serialized = super::serialize_vector(&embedded_queries[src.as_str()]);
            db_query = db_query.bind(serialized).bind(limit);
        }

        db_query = db_query
            .bind(&start)
            .bind(&end)
            .bind(&start)
            .bind(&end)
            .bind(&start)
            .bind(&end);
        for source in sources {
            db_query = db_query.bind(source);
        }
        let escaped = escape(query);
        db_query = db_query.bind(ItemStatus::Finished).bind(&escaped).bind(limit);

        let rows = db_query.fetch_all(self.pool()).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let title: String = row.try_get("title")?;
            let description: String = row.try_get("description")?;
            let content: String = row.try_get("content")?;
            results.push(HybridResult {
                url: row.try_get("url")?,
                title: parse_highlights(&title, &start, &end),
                description: parse_highlights(&description, &start, &end),
                content: parse_highlights(&content, &start, &end),
                vec_distance: row.try_get("vec_distance")?,
                vec_rank: row.try_get("vec_rank")?,
                fts_rank: row.try_get("fts_rank")?,
                hybrid_rank: row.try_get("combined_rank")?,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup_test_store;
    use super::*;
    use crate::models::ItemStatus;

    #[tokio::test]
    async fn test_hybrid_fts_only() {
        let (store, _tmp) = setup_test_store().await;
        store
            .add_document(
                "s",
                0,
                &[],
                "https://a.test/",
                ItemStatus::Finished,
                "Rust guide",
                "All about Rust",
                "Rust is a systems programming language",
                "",
            )
            .await
            .unwrap();

        let results = store
            .hybrid_search(&["s".to_string()], "rust", &HashMap::new(), 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let res = &results[0];
        assert_eq!(res.url, "https://a.test/");
        assert_eq!(res.fts_rank, Some(1));
        assert_eq!(res.vec_rank, None);
        assert_eq!(res.vec_distance, None);
        let expected = 1.0 / 61.0;
        assert!((res.hybrid_rank - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hybrid_fuses_fts_and_vector_ranks() {
        let (store, _tmp) = setup_test_store().await;
        store.setup_vector("s", 3).await.unwrap();

        let both = store
            .add_document(
                "s",
                0,
                &[],
                "https://both.test/",
                ItemStatus::Finished,
                "shared topic",
                "",
                "body about the shared topic",
                "",
            )
            .await
            .unwrap();
        store
            .add_document(
                "s",
                0,
                &[],
                "https://lexical.test/",
                ItemStatus::Finished,
                "another page on shared things",
                "",
                "less relevant body",
                "",
            )
            .await
            .unwrap();

        store
            .add_embedding(both, "s", 0, "the matching chunk", &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let mut embedded = HashMap::new();
        embedded.insert("s".to_string(), vec![1.0, 0.0, 0.0]);

        let results = store
            .hybrid_search(&["s".to_string()], "shared", &embedded, 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);

        // A document ranked first in both lists beats one missing the vector
        // component.
        let top = &results[0];
        assert_eq!(top.url, "https://both.test/");
        assert_eq!(top.vec_rank, Some(1));
        assert!(top.vec_distance.is_some());
        let expected = (1.0 / 61.0) * 0.5 + 1.0 / 61.0;
        assert!((top.hybrid_rank - expected).abs() < 1e-9);

        assert!(results[0].hybrid_rank > results[1].hybrid_rank);
        assert_eq!(results[1].vec_rank, None);
    }

    #[tokio::test]
    async fn test_hybrid_vector_only_row_falls_back_to_page_fields() {
        let (store, _tmp) = setup_test_store().await;
        store.setup_vector("s", 3).await.unwrap();

        let page = store
            .add_document(
                "s",
                0,
                &[],
                "https://vec-only.test/",
                ItemStatus::Finished,
                "unrelated title",
                "plain description",
                "nothing matching here",
                "",
            )
            .await
            .unwrap();
        store
            .add_embedding(page, "s", 0, "semantic chunk", &[0.0, 1.0, 0.0])
            .await
            .unwrap();

        let mut embedded = HashMap::new();
        embedded.insert("s".to_string(), vec![0.0, 1.0, 0.0]);

        let results = store
            .hybrid_search(&["s".to_string()], "zzz_no_lexical_match", &embedded, 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let res = &results[0];
        assert_eq!(res.fts_rank, None);
        assert_eq!(res.vec_rank, Some(1));
        // Field runs come from the plain page columns and the matched chunk
        assert_eq!(res.title, vec![crate::models::Match { highlighted: false, content: "unrelated title".into() }]);
        assert_eq!(res.content, vec![crate::models::Match { highlighted: false, content: "semantic chunk".into() }]);
    }

    #[tokio::test]
    async fn test_hybrid_best_chunk_per_page() {
        let (store, _tmp) = setup_test_store().await;
        store.setup_vector("s", 3).await.unwrap();

        let page = store
            .add_document("s", 0, &[], "https://multi.test/", ItemStatus::Finished, "multi", "", "", "")
            .await
            .unwrap();
        store
            .add_embedding(page, "s", 0, "far chunk", &[0.0, 0.0, 1.0])
            .await
            .unwrap();
        store
            .add_embedding(page, "s", 1, "close chunk", &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let mut embedded = HashMap::new();
        embedded.insert("s".to_string(), vec![1.0, 0.0, 0.0]);

        let results = store
            .hybrid_search(&["s".to_string()], "zzz_nothing", &embedded, 10)
            .await
            .unwrap();

        // One row per page, carrying its closest chunk
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content[0].content, "close chunk");
    }

    #[tokio::test]
    async fn test_hybrid_empty_sources() {
        let (store, _tmp) = setup_test_store().await;
        let results = store
            .hybrid_search(&[], "query", &HashMap::new(), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
