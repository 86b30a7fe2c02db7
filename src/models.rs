//! Shared data types for pages, queues, and search results

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status shared by queue rows and indexed pages.
///
/// `Unindexable` is only used in the pages table: it records that a URL was
/// fetched but carries no indexable content (a sitemap or feed, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum ItemStatus {
    Pending = 0,
    Processing = 1,
    Finished = 2,
    Error = 3,
    Unindexable = 4,
}

/// An indexed page
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub source: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub depth: i64,
    pub crawled_at: String,
    pub status: ItemStatus,
    pub error_info: String,
}

/// A memoized original → canonical URL mapping
#[derive(Debug, Clone, FromRow)]
pub struct Canonical {
    pub id: i64,
    pub url: String,
    pub canonical: String,
    pub crawled_at: String,
}

/// A claimed crawl queue row, including accumulated referrer page ids
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub source: String,
    pub url: String,
    pub depth: i64,
    pub is_refresh: bool,
    pub status: ItemStatus,
    pub added_at: String,
    pub updated_at: String,
    pub referrers: Vec<i64>,
}

/// A claimed embed queue row
#[derive(Debug, Clone, FromRow)]
pub struct EmbedQueueItem {
    pub id: i64,
    pub status: ItemStatus,
    pub page_id: i64,
    pub chunk_index: i64,
    pub chunk: String,
}

/// One run of highlighted or plain text inside a search result field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub highlighted: bool,
    pub content: String,
}

/// A full-text search result
#[derive(Debug, Clone, Serialize)]
pub struct FtsResult {
    pub url: String,
    pub title: Vec<Match>,
    pub description: Vec<Match>,
    pub content: Vec<Match>,
    pub rank: f64,
}

/// A vector similarity search result; `similarity` is a cosine distance,
/// smaller is better.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub url: String,
    pub title: String,
    pub chunk: String,
    pub similarity: f64,
}

/// A reciprocal-rank-fusion result combining FTS and vector rankings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResult {
    pub url: String,
    pub title: Vec<Match>,
    pub description: Vec<Match>,
    pub content: Vec<Match>,
    pub fts_rank: Option<i64>,
    pub vec_rank: Option<i64>,
    pub vec_distance: Option<f64>,
    #[serde(rename = "rank")]
    pub hybrid_rank: f64,
}
