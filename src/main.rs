//! siteindex entry point
//!
//! Startup order matters: schema first, then the spellfix vocabulary and
//! per-source vector tables, then one cleanup pass to reclaim leases leaked
//! by a previous run, and only then the workers and the HTTP server.

use siteindex::config::Config;
use siteindex::crawl::Crawler;
use siteindex::embed::EmbeddingClient;
use siteindex::error::Result;
use siteindex::scheduler;
use siteindex::server::{self, AppState};
use siteindex::store::Store;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load(Path::new("./config.yml"))?;

    let store = Store::open(Path::new(&config.db.connection_string)).await?;
    store.setup().await?;

    let start = Instant::now();
    match store.create_spellfix_index().await {
        Ok(()) => info!(
            "created spellfix index in {}ms",
            start.elapsed().as_millis()
        ),
        Err(e) => warn!(error = %e, "failed to create spellfix index"),
    }

    for source in &config.sources {
        if source.embeddings.enabled {
            store
                .setup_vector(&source.id, source.embeddings.dimensions)
                .await?;
        }
    }

    // Reclaim queue rows leaked by an earlier run before the workers start
    if let Err(e) = store.cleanup().await {
        error!(error = %e, "failed to run cleanup");
    }

    let config = Arc::new(config);
    let crawler = Arc::new(Crawler::new(store.clone())?);
    let embedder = Arc::new(EmbeddingClient::new()?);

    scheduler::start(
        store.clone(),
        Arc::clone(&config),
        crawler,
        Arc::clone(&embedder),
    );
    scheduler::seed_sources(&store, &config).await;

    server::run(AppState {
        store,
        config,
        embedder,
    })
    .await
}
