//! JSON search API
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/search` | Full-text search with pagination |
//! | `GET` | `/api/similarity-search` | Vector similarity search |
//! | `GET` | `/api/hybrid-search` | Reciprocal-rank-fusion of both |
//!
//! All three take repeatable `source` parameters and a `q` query string;
//! `/api/search` additionally requires `page` (1-based). Responses carry
//! `success`, a `responseTime` in seconds, and `results` (empty, never
//! null, for zero-result queries). Internal failures return 500 with a
//! generic error string; details go to the server log.

use crate::config::{Config, Source};
use crate::embed::EmbeddingClient;
use crate::models::{FtsResult, HybridResult, SimilarityResult};
use crate::store::Store;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Results per page for the FTS endpoint
const PAGE_SIZE: u32 = 10;

/// Result budget for similarity and hybrid queries
const RESULT_LIMIT: i64 = 10;

/// Shared state for all route handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<Config>,
    pub embedder: Arc<EmbeddingClient>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", get(handle_search))
        .route("/api/similarity-search", get(handle_similarity_search))
        .route("/api/hybrid-search", get(handle_hybrid_search))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn run(state: AppState) -> crate::error::Result<()> {
    let addr = format!("{}:{}", state.config.http.listen, state.config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server is listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct Pagination {
    page: u32,
    #[serde(rename = "pageSize")]
    page_size: u32,
    total: u32,
}

#[derive(Serialize)]
struct SearchResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    results: Vec<FtsResult>,
    pagination: Pagination,
    #[serde(rename = "responseTime")]
    response_time: f64,
}

#[derive(Serialize)]
struct SimilarityResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    results: Vec<SimilarityResult>,
    #[serde(rename = "responseTime")]
    response_time: f64,
}

#[derive(Serialize)]
struct HybridResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    results: Vec<HybridResult>,
    #[serde(rename = "responseTime")]
    response_time: f64,
}

/// Query parameters shared by the endpoints
struct Params {
    sources: Vec<String>,
    q: String,
    page: Option<u32>,
}

fn parse_params(raw: Option<&str>) -> Params {
    let mut params = Params {
        sources: Vec::new(),
        q: String::new(),
        page: None,
    };

    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "source" => params.sources.push(value.into_owned()),
            "q" => params.q = value.into_owned(),
            "page" => params.page = value.parse().ok(),
            _ => {}
        }
    }

    params
}

/// Selected sources, in request order, that exist in the configuration.
/// Repeated ids collapse to their first occurrence.
fn find_sources<'a>(config: &'a Config, ids: &[String]) -> Vec<&'a Source> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| config.source(id))
        .collect()
}

/// One query embedding per distinct model across the selection, mapped back
/// to each embeddings-enabled source id.
async fn embed_queries(
    embedder: &EmbeddingClient,
    sources: &[&Source],
    query: &str,
) -> crate::error::Result<HashMap<String, Vec<f32>>> {
    let mut by_model: HashMap<String, Vec<f32>> = HashMap::new();
    let mut by_source = HashMap::new();

    for source in sources {
        let embeddings = &source.embeddings;
        if !embeddings.enabled {
            continue;
        }
        if !by_model.contains_key(&embeddings.model) {
            let vectors = embedder
                .embed(
                    &embeddings.openai_base_url,
                    &embeddings.model,
                    &embeddings.api_key,
                    &[query.to_string()],
                )
                .await?;
            let Some(vector) = vectors.into_iter().next() else {
                continue;
            };
            by_model.insert(embeddings.model.clone(), vector);
        }
        by_source.insert(source.id.clone(), by_model[&embeddings.model].clone());
    }

    Ok(by_source)
}

async fn spellfix_query(store: &Store, q: &str) -> String {
    match store.spellfix(q).await {
        Ok(fixed) => fixed,
        Err(e) => {
            error!(error = %e, "failed to spellcheck query");
            q.to_string()
        }
    }
}

async fn handle_search(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Response {
    let started = Instant::now();
    let params = parse_params(raw.as_deref());

    let respond = |status: StatusCode,
                   error: Option<String>,
                   results: Vec<FtsResult>,
                   page: u32,
                   total: u32,
                   started: Instant| {
        (
            status,
            Json(SearchResponse {
                success: error.is_none(),
                error,
                results,
                pagination: Pagination {
                    page,
                    page_size: PAGE_SIZE,
                    total,
                },
                response_time: started.elapsed().as_secs_f64(),
            }),
        )
            .into_response()
    };

    let Some(page) = params.page.filter(|p| *p >= 1) else {
        return respond(
            StatusCode::BAD_REQUEST,
            Some("Bad request".to_string()),
            Vec::new(),
            0,
            0,
            started,
        );
    };
    if params.q.is_empty() || params.sources.is_empty() {
        return respond(
            StatusCode::BAD_REQUEST,
            Some("Bad request".to_string()),
            Vec::new(),
            0,
            0,
            started,
        );
    }

    let query = spellfix_query(&state.store, &params.q).await;

    match state.store.search(&params.sources, &query, page, PAGE_SIZE).await {
        Ok((results, total)) => respond(StatusCode::OK, None, results, page, total, started),
        Err(e) => {
            error!(error = %e, "failed to generate search results");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("Internal server error".to_string()),
                Vec::new(),
                page,
                0,
                started,
            )
        }
    }
}

async fn handle_similarity_search(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Response {
    let started = Instant::now();
    let params = parse_params(raw.as_deref());

    let respond = |status: StatusCode,
                   error: Option<String>,
                   results: Vec<SimilarityResult>,
                   started: Instant| {
        (
            status,
            Json(SimilarityResponse {
                success: error.is_none(),
                error,
                results,
                response_time: started.elapsed().as_secs_f64(),
            }),
        )
            .into_response()
    };

    if params.q.is_empty() || params.sources.is_empty() {
        return respond(
            StatusCode::BAD_REQUEST,
            Some("Bad request".to_string()),
            Vec::new(),
            started,
        );
    }

    let sources = find_sources(&state.config, &params.sources);

    let embedded = match embed_queries(&state.embedder, &sources, &params.q).await {
        Ok(embedded) => embedded,
        Err(e) => {
            error!(error = %e, "failed to generate embeddings for query");
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("Internal server error".to_string()),
                Vec::new(),
                started,
            );
        }
    };

    let mut all_results = Vec::new();
    for source in &sources {
        let Some(vector) = embedded.get(&source.id) else {
            continue;
        };
        match state
            .store
            .similarity_search(&source.id, vector, RESULT_LIMIT)
            .await
        {
            Ok(results) => all_results.extend(results),
            Err(e) => {
                error!(source = %source.id, error = %e, "failed to generate search results");
                return respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some("Internal server error".to_string()),
                    Vec::new(),
                    started,
                );
            }
        }
    }

    // The value is a distance, so smaller is better
    all_results.sort_by(|a, b| a.similarity.total_cmp(&b.similarity));

    respond(StatusCode::OK, None, all_results, started)
}

async fn handle_hybrid_search(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Response {
    let started = Instant::now();
    let params = parse_params(raw.as_deref());

    let respond = |status: StatusCode,
                   error: Option<String>,
                   results: Vec<HybridResult>,
                   started: Instant| {
        (
            status,
            Json(HybridResponse {
                success: error.is_none(),
                error,
                results,
                response_time: started.elapsed().as_secs_f64(),
            }),
        )
            .into_response()
    };

    if params.q.is_empty() || params.sources.is_empty() {
        return respond(
            StatusCode::BAD_REQUEST,
            Some("Bad request".to_string()),
            Vec::new(),
            started,
        );
    }

    let sources = find_sources(&state.config, &params.sources);
    if sources.is_empty() {
        return respond(
            StatusCode::BAD_REQUEST,
            Some("No valid sources found".to_string()),
            Vec::new(),
            started,
        );
    }

    let embedded = match embed_queries(&state.embedder, &sources, &params.q).await {
        Ok(embedded) => embedded,
        Err(e) => {
            error!(error = %e, "failed to generate embeddings for search query");
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("Internal server error".to_string()),
                Vec::new(),
                started,
            );
        }
    };

    let source_ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();
    let query = spellfix_query(&state.store, &params.q).await;

    match state
        .store
        .hybrid_search(&source_ids, &query, &embedded, RESULT_LIMIT)
        .await
    {
        Ok(results) => respond(StatusCode::OK, None, results, started),
        Err(e) => {
            error!(error = %e, "failed to generate search results");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("Internal server error".to_string()),
                Vec::new(),
                started,
            )
        }
    }
}
