//! Periodic workers
//!
//! One tokio task per (source, job kind), paced by the source's configured
//! request rates, plus global refresh, cleanup, and spellfix-rebuild loops.
//! Every tick runs under a deadline; a tick that overruns is cancelled and
//! its claimed queue rows are reclaimed by the next cleanup pass once their
//! lease ages out.

use crate::chunk;
use crate::config::{Config, Source};
use crate::crawl::{canonical, CrawlOutcome, Crawler};
use crate::embed::EmbeddingClient;
use crate::models::ItemStatus;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{error, warn};
use url::Url;

const CRAWL_TICK_DEADLINE: Duration = Duration::from_secs(60);
const EMBED_TICK_DEADLINE: Duration = Duration::from_secs(30);
const REFRESH_TICK_DEADLINE: Duration = Duration::from_secs(5);
const CLEANUP_TICK_DEADLINE: Duration = Duration::from_secs(15);
const SPELLFIX_TICK_DEADLINE: Duration = Duration::from_secs(15);

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const SPELLFIX_INTERVAL: Duration = Duration::from_secs(300);

/// Spawn every periodic worker. Returns immediately; the tasks run for the
/// life of the process.
pub fn start(
    store: Store,
    config: Arc<Config>,
    crawler: Arc<Crawler>,
    embedder: Arc<EmbeddingClient>,
) {
    for source in &config.sources {
        let source = source.clone();
        let store = store.clone();
        let crawler = Arc::clone(&crawler);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs_f64(60.0 / source.speed as f64));
            loop {
                ticker.tick().await;
                if timeout(CRAWL_TICK_DEADLINE, crawl_tick(&store, &crawler, &source))
                    .await
                    .is_err()
                {
                    warn!(source = %source.id, "crawl tick exceeded its deadline");
                }
            }
        });
    }

    for source in &config.sources {
        if !source.embeddings.enabled {
            continue;
        }
        let source = source.clone();
        let store = store.clone();
        let embedder = Arc::clone(&embedder);
        tokio::spawn(async move {
            let mut ticker =
                interval(Duration::from_secs_f64(60.0 / source.embeddings.speed as f64));
            loop {
                ticker.tick().await;
                if timeout(EMBED_TICK_DEADLINE, embed_tick(&store, &embedder, &source))
                    .await
                    .is_err()
                {
                    warn!(source = %source.id, "embed tick exceeded its deadline");
                }
            }
        });
    }

    {
        let store = store.clone();
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            let mut ticker = interval(REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                for source in &config.sources {
                    if !source.refresh.enabled {
                        continue;
                    }
                    let tick = store.queue_pages_older_than(&source.id, source.refresh.min_age);
                    match timeout(REFRESH_TICK_DEADLINE, tick).await {
                        Ok(Err(e)) => error!(source = %source.id, error = %e, "refresh failed"),
                        Err(_) => warn!(source = %source.id, "refresh tick exceeded its deadline"),
                        Ok(Ok(())) => {}
                    }
                }
            }
        });
    }

    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                match timeout(CLEANUP_TICK_DEADLINE, store.cleanup()).await {
                    Ok(Err(e)) => error!(error = %e, "cleanup failed"),
                    Err(_) => warn!("cleanup tick exceeded its deadline"),
                    Ok(Ok(())) => {}
                }
            }
        });
    }

    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SPELLFIX_INTERVAL);
            // The index was already built at startup; skip the immediate tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match timeout(SPELLFIX_TICK_DEADLINE, store.create_spellfix_index()).await {
                    Ok(Err(e)) => error!(error = %e, "spellfix rebuild failed"),
                    Err(_) => warn!("spellfix rebuild exceeded its deadline"),
                    Ok(Ok(())) => {}
                }
            }
        });
    }
}

/// Queue the base URL of every source that has not been crawled yet
pub async fn seed_sources(store: &Store, config: &Config) {
    for source in &config.sources {
        match store.has_document(&source.id, &source.url).await {
            Ok(true) => {}
            Ok(false) => {
                let canonical = match canonical::canonicalize(store, &source.id, &source.url).await
                {
                    Ok(c) => c,
                    Err(e) => {
                        error!(source = %source.id, url = %source.url, error = %e, "cannot canonicalize start URL");
                        continue;
                    }
                };
                if let Err(e) = store
                    .add_to_queue(&source.id, &canonical, &[canonical.clone()], 0, false)
                    .await
                {
                    error!(source = %source.id, url = %source.url, error = %e, "failed to queue start URL");
                }
            }
            Err(e) => {
                error!(source = %source.id, url = %source.url, error = %e, "failed to look up start URL");
            }
        }
    }
}

/// Pop one crawl queue item and run it to completion
pub async fn crawl_tick(store: &Store, crawler: &Crawler, source: &Source) {
    let item = match store.pop_queue(&source.id).await {
        Ok(Some(item)) => item,
        Ok(None) => return,
        Err(e) => {
            error!(source = %source.id, error = %e, "failed to pop crawl queue");
            return;
        }
    };

    let result = match crawler.crawl(source, item.depth, &item.referrers, &item.url).await {
        Err(failure) => {
            error!(source = %source.id, url = %item.url, error = %failure.error, "failed to crawl URL");

            if let Err(e) = store.update_queue_entry(item.id, ItemStatus::Error).await {
                error!(error = %e, "failed to mark queue item as Error");
            }

            // Park an Error page under the canonical so other referrers do
            // not immediately re-trigger the same URL. Refresh will retry it
            // once the page ages out.
            if let Some(canonical) = failure.canonical {
                if let Err(e) = store
                    .add_document(
                        &source.id,
                        item.depth,
                        &item.referrers,
                        &canonical,
                        ItemStatus::Error,
                        "",
                        "",
                        "",
                        &failure.error.to_string(),
                    )
                    .await
                {
                    error!(error = %e, "failed to add placeholder page in Error state");
                }
            }
            return;
        }
        Ok(CrawlOutcome::Aliased { .. }) => {
            // The canonical mapping is all there was to record
            if let Err(e) = store.update_queue_entry(item.id, ItemStatus::Finished).await {
                error!(error = %e, "failed to mark queue item as Finished");
            }
            return;
        }
        Ok(CrawlOutcome::Indexed(result)) => result,
    };

    if source.embeddings.enabled && result.page_id > 0 {
        let chunks: Vec<String> = chunk::chunk_text(
            &result.content.content,
            source.embeddings.chunk_size,
            source.embeddings.chunk_overlap,
        )
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect();

        if let Err(e) = store.add_to_embed_queue(result.page_id, &chunks).await {
            error!(error = %e, "failed to add page chunks to embed queue");
        }
    }

    if let Err(e) = store.update_queue_entry(item.id, ItemStatus::Finished).await {
        error!(error = %e, "failed to mark queue item as Finished");
    }

    // Rebuild outbound edges from scratch; inbound edges are preserved.
    if let Err(e) = store.remove_all_references(result.page_id).await {
        error!(error = %e, "failed to remove old references");
    }
    for url in filter_urls(store, source, &result.urls, false).await {
        let Ok(Some(doc)) = store.get_document(&source.id, &url).await else {
            continue;
        };
        if let Err(e) = store.add_referrer(result.page_id, doc.id).await {
            error!(error = %e, "failed to record referrer");
        }
    }

    if item.depth + 1 >= source.max_depth {
        return;
    }

    let fresh = filter_urls(store, source, &result.urls, true).await;
    if let Err(e) = store
        .add_to_queue(&source.id, &result.canonical, &fresh, item.depth + 1, false)
        .await
    {
        error!(error = %e, "failed to add discovered URLs to queue");
    }
}

/// Keep URLs on the source's allowed domains; with `new_only`, also drop
/// URLs that are already indexed.
async fn filter_urls(
    store: &Store,
    source: &Source,
    urls: &[String],
    new_only: bool,
) -> Vec<String> {
    let mut filtered = Vec::new();

    for url in urls {
        let Ok(parsed) = Url::parse(url) else {
            continue;
        };
        let host = parsed.host_str().unwrap_or_default();
        if !source.allowed_domains.iter().any(|d| d == host) {
            continue;
        }
        if new_only {
            match store.has_document(&source.id, url).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "failed to check for existing document");
                    continue;
                }
            }
        }
        filtered.push(url.clone());
    }

    filtered
}

/// Catch up unembedded pages, then claim and embed one batch
pub async fn embed_tick(store: &Store, embedder: &EmbeddingClient, source: &Source) {
    let embeddings = &source.embeddings;

    if let Err(e) = store
        .start_embeddings(&source.id, embeddings.chunk_size, embeddings.chunk_overlap)
        .await
    {
        error!(source = %source.id, error = %e, "failed to queue pages that need embeddings");
    }

    let items = match store.pop_embed_queue(embeddings.batch_size, &source.id).await {
        Ok(items) => items,
        Err(e) => {
            error!(source = %source.id, error = %e, "failed to pop embed queue");
            return;
        }
    };
    if items.is_empty() {
        return;
    }

    let mark_failure = |id: i64| async move {
        if let Err(e) = store.update_embed_queue_entry(id, ItemStatus::Error).await {
            error!(error = %e, "failed to mark embed queue item as Error");
        }
    };

    let chunks: Vec<String> = items.iter().map(|i| i.chunk.clone()).collect();

    let vectors = match embedder
        .embed(
            &embeddings.openai_base_url,
            &embeddings.model,
            &embeddings.api_key,
            &chunks,
        )
        .await
    {
        Ok(vectors) => vectors,
        Err(e) => {
            error!(source = %source.id, error = %e, "failed to generate embeddings");
            for item in &items {
                mark_failure(item.id).await;
            }
            return;
        }
    };

    for (item, vector) in items.iter().zip(vectors) {
        if let Err(e) = store
            .add_embedding(item.page_id, &source.id, item.chunk_index, &item.chunk, &vector)
            .await
        {
            error!(error = %e, "failed to save embedding");
            mark_failure(item.id).await;
            return;
        }

        if let Err(e) = store
            .update_embed_queue_entry(item.id, ItemStatus::Finished)
            .await
        {
            error!(error = %e, "failed to mark embed queue item as Finished");
        }
    }
}
