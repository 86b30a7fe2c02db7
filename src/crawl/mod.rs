//! Fetching and ingesting a single URL
//!
//! `Crawler::crawl` drives one queue item end to end: canonicalize, check
//! domain and robots rules, fetch, dispatch on content type (HTML, sitemap,
//! feed), extract text, and upsert the page. Discovered URLs come back to
//! the caller, which owns queueing and the referrer graph.

pub mod canonical;
pub mod feed;
pub mod robots;
pub mod sitemap;

use crate::config::Source;
use crate::error::Error;
use crate::models::ItemStatus;
use crate::parse;
use crate::store::Store;
use robots::RobotsRules;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

pub const USER_AGENT: &str = concat!("siteindex/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout for page and robots.txt fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Content extracted from one fetched page
#[derive(Debug, Clone)]
pub struct PageContent {
    pub status: ItemStatus,
    pub title: String,
    pub description: String,
    pub content: String,
    pub error_info: String,
}

impl Default for PageContent {
    fn default() -> Self {
        Self {
            status: ItemStatus::Unindexable,
            title: String::new(),
            description: String::new(),
            content: String::new(),
            error_info: String::new(),
        }
    }
}

/// A successfully ingested page
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// URLs discovered on the page, canonicalized and deduplicated
    pub urls: Vec<String>,
    /// The canonical URL the page was stored under
    pub canonical: String,
    /// The extracted content, before size-limit truncation
    pub content: PageContent,
    /// Row id of the upserted page
    pub page_id: i64,
}

/// Outcome of crawling one queue item
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    /// The page was fetched, extracted, and upserted
    Indexed(CrawlResult),
    /// The URL redirected to an already-indexed page; only the canonical
    /// mapping was recorded.
    Aliased { canonical: String },
}

/// A failed crawl, carrying the canonical URL when one was discovered so the
/// caller can park an Error page there.
#[derive(Debug)]
pub struct CrawlFailure {
    pub canonical: Option<String>,
    pub error: Error,
}

impl CrawlFailure {
    fn new(canonical: Option<String>, error: Error) -> Self {
        Self { canonical, error }
    }
}

type CrawlResultT = std::result::Result<CrawlOutcome, CrawlFailure>;

/// Shared fetch state: HTTP client and per-origin robots.txt cache
pub struct Crawler {
    client: reqwest::Client,
    store: Store,
    robots_cache: Arc<RwLock<HashMap<String, RobotsRules>>>,
}

impl Crawler {
    pub fn new(store: Store) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            store,
            robots_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Crawl one URL for a source.
    ///
    /// Failures before a canonical URL is known (bad URL, disallowed domain)
    /// carry no canonical, and no page row should be written for them.
    pub async fn crawl(
        &self,
        source: &Source,
        depth: i64,
        referrers: &[i64],
        page_url: &str,
    ) -> CrawlResultT {
        let mut canonical = canonical::canonicalize(&self.store, &source.id, page_url)
            .await
            .map_err(|e| CrawlFailure::new(None, e))?;

        let url = Url::parse(&canonical).map_err(|e| CrawlFailure::new(None, e.into()))?;

        self.check_domain(source, &url, None)?;

        if !self.robots_allows(&url).await {
            return Err(CrawlFailure::new(
                Some(canonical.clone()),
                Error::RobotsDisallowed(canonical),
            ));
        }

        debug!(original = page_url, canonical = %canonical, "crawling URL");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e.into()))?;

        let http_status = response.status();
        let final_url = response.url().clone();

        // Redirects change the page's identity
        if final_url != url {
            canonical = final_url.to_string();
            self.check_domain(source, &final_url, Some(&canonical))?;
        }

        if !http_status.is_success() {
            return Err(CrawlFailure::new(
                Some(canonical),
                Error::HttpStatus {
                    status: http_status.as_u16(),
                    url: final_url.to_string(),
                },
            ));
        }

        // Redirect from an unindexed URL to an indexed page: record the
        // alias and skip the rest of the work.
        let orig_indexed = self
            .store
            .has_document(&source.id, page_url)
            .await
            .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e))?;
        if !orig_indexed && canonical != page_url {
            let canonical_indexed = self
                .store
                .has_document(&source.id, &canonical)
                .await
                .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e))?;
            if canonical_indexed {
                self.store
                    .set_canonical(&source.id, page_url, &canonical)
                    .await
                    .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e))?;
                info!(original = page_url, canonical = %canonical, "redirect target already indexed");
                return Ok(CrawlOutcome::Aliased { canonical });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e.into()))?;

        let mut page = PageContent::default();
        let mut urls = Vec::new();
        let mut seen = HashSet::new();

        if content_type.starts_with("application/xml") || content_type.starts_with("text/xml") {
            // Sitemaps and sitemap indexes; entries queue like any other URL
            for loc in sitemap::parse_sitemap(&body) {
                self.collect(source, &final_url, &loc, &mut urls, &mut seen).await;
            }
        } else if content_type.starts_with("application/rss+xml")
            || content_type.starts_with("application/atom+xml")
            || content_type.starts_with("application/feed+json")
        {
            match feed::parse_feed(&body) {
                Ok(links) => {
                    for link in links {
                        self.collect(source, &final_url, &link, &mut urls, &mut seen).await;
                    }
                }
                Err(_) => {
                    page.status = ItemStatus::Error;
                    page.error_info = "Invalid feed content".to_string();
                }
            }
        } else if content_type.starts_with("text/html")
            || content_type.starts_with("application/xhtml+xml")
        {
            let extracted = parse::extract(&body, &final_url);

            if let Some(meta_canonical) = &extracted.canonical {
                canonical = meta_canonical.clone();
            }

            for link in extracted.alternates.iter().chain(extracted.anchors.iter()) {
                self.collect(source, &final_url, link, &mut urls, &mut seen).await;
            }

            page.status = extracted.status.unwrap_or(ItemStatus::Unindexable);
            page.title = extracted.title;
            page.description = extracted.description;
            page.content = extracted.content;
            page.error_info = extracted.error_info;
        }

        if canonical != page_url {
            self.store
                .set_canonical(&source.id, page_url, &canonical)
                .await
                .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e))?;
        }

        let fields = parse::truncate(
            source.size_limit,
            &[&page.title, &page.description, &page.content],
        );
        let page_id = self
            .store
            .add_document(
                &source.id,
                depth,
                referrers,
                &canonical,
                page.status,
                &fields[0],
                &fields[1],
                &fields[2],
                &page.error_info,
            )
            .await
            .map_err(|e| CrawlFailure::new(Some(canonical.clone()), e))?;

        Ok(CrawlOutcome::Indexed(CrawlResult {
            urls,
            canonical,
            content: page,
            page_id,
        }))
    }

    fn check_domain(
        &self,
        source: &Source,
        url: &Url,
        canonical: Option<&String>,
    ) -> std::result::Result<(), CrawlFailure> {
        let host = url.host_str().unwrap_or_default();
        if source.allowed_domains.iter().any(|d| d == host) {
            Ok(())
        } else {
            Err(CrawlFailure::new(
                canonical.cloned(),
                Error::ForbiddenDomain(url.to_string()),
            ))
        }
    }

    /// Canonicalize a discovered URL and add it once
    async fn collect(
        &self,
        source: &Source,
        base: &Url,
        raw: &str,
        urls: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) {
        let Ok(resolved) = base.join(raw) else {
            return;
        };
        let Ok(canonical) =
            canonical::canonicalize(&self.store, &source.id, resolved.as_str()).await
        else {
            return;
        };
        if seen.insert(canonical.clone()) {
            urls.push(canonical);
        }
    }

    /// Check robots.txt for the URL's origin, fetching and caching the rules
    /// on first contact. Hosts without robots.txt allow everything.
    async fn robots_allows(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();

        {
            let cache = self.robots_cache.read().await;
            if let Some(rules) = cache.get(&origin) {
                return rules.is_allowed(url.path(), USER_AGENT);
            }
        }

        let robots_url = format!("{origin}/robots.txt");
        debug!("fetching {robots_url}");

        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                RobotsRules::parse(&response.text().await.unwrap_or_default())
            }
            _ => RobotsRules::allow_all(),
        };

        let allowed = rules.is_allowed(url.path(), USER_AGENT);
        self.robots_cache.write().await.insert(origin, rules);
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_size_limit, default_speed, EmbeddingsConfig, RefreshConfig};
    use crate::store::tests::setup_test_store;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_source(id: &str, base: &str) -> Source {
        Source {
            id: id.to_string(),
            url: base.to_string(),
            speed: default_speed(),
            size_limit: default_size_limit(),
            allowed_domains: vec!["127.0.0.1".to_string()],
            max_depth: 3,
            refresh: RefreshConfig::default(),
            embeddings: EmbeddingsConfig::default(),
        }
    }

    async fn mock_html(server: &MockServer, route: &str, html: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(html.as_bytes().to_vec(), "text/html"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_simple_crawl() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;
        mock_html(
            &server,
            "/",
            r#"<html><head><title>Example Domain</title></head>
            <body><p>This domain is for use in illustrative examples in documents,
            with enough text for the extractor to keep it around as the article.</p>
            <a href="https://www.iana.org/domains/example">More information</a>
            </body></html>"#,
        )
        .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler.crawl(&source, 0, &[], &server.uri()).await.unwrap();

        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert_eq!(result.canonical, server.uri());
        assert_eq!(result.urls, vec!["https://www.iana.org/domains/example"]);
        assert_eq!(result.content.status, ItemStatus::Finished);
        assert_eq!(result.content.title, "Example Domain");

        let page = store
            .get_document("example", &server.uri())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.id, result.page_id);
        assert_eq!(page.status, ItemStatus::Finished);
        assert!(page.content.contains("illustrative examples"));
    }

    #[tokio::test]
    async fn test_redirect_records_canonical() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        mock_html(
            &server,
            "/new",
            "<html><head><title>Moved</title></head><body><p>content</p></body></html>",
        )
        .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let old_url = format!("{}/old", server.uri());
        let expected_canonical = format!("{}/new", server.uri());

        let outcome = crawler.crawl(&source, 0, &[], &old_url).await.unwrap();
        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert_eq!(result.canonical, expected_canonical);

        let mapping = store.get_canonical("example", &old_url).await.unwrap().unwrap();
        assert_eq!(mapping.canonical, expected_canonical);
    }

    #[tokio::test]
    async fn test_redirect_to_indexed_page_short_circuits() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        mock_html(&server, "/new", "<html><body><p>already here</p></body></html>").await;

        let target = format!("{}/new", server.uri());
        store
            .add_document("example", 0, &[], &target, ItemStatus::Finished, "t", "", "c", "")
            .await
            .unwrap();

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let old_url = format!("{}/old", server.uri());
        let outcome = crawler.crawl(&source, 0, &[], &old_url).await.unwrap();

        let CrawlOutcome::Aliased { canonical } = outcome else {
            panic!("expected the alias shortcut");
        };
        assert_eq!(canonical, target);

        // One page row, plus the recorded alias
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.get_canonical("example", &old_url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_forbidden_domain_writes_nothing() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        let mut source = test_source("example", &server.uri());
        source.allowed_domains = vec!["www.example.com".to_string()];

        let crawler = Crawler::new(store.clone()).unwrap();
        let failure = crawler
            .crawl(&source, 0, &[], &format!("{}/portfolio", server.uri()))
            .await
            .unwrap_err();

        assert!(failure.canonical.is_none());
        assert!(matches!(failure.error, Error::ForbiddenDomain(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_http_error_carries_canonical() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let url = format!("{}/broken", server.uri());
        let failure = crawler.crawl(&source, 0, &[], &url).await.unwrap_err();

        assert_eq!(failure.canonical.as_deref(), Some(url.as_str()));
        assert!(matches!(failure.error, Error::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_sitemap_is_unindexable_and_fans_out() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        let mut urls = String::new();
        for i in 0..25 {
            urls.push_str(&format!(
                "<url><loc>{}/page/{}</loc></url>",
                server.uri(),
                i
            ));
        }
        let sitemap = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{urls}</urlset>"#
        );

        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sitemap.into_bytes(), "application/xml"),
            )
            .mount(&server)
            .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler
            .crawl(&source, 0, &[], &format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap();

        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert!(result.urls.len() >= 20, "got {} URLs", result.urls.len());
        assert_eq!(result.content.status, ItemStatus::Unindexable);

        let page = store
            .get_document("example", &result.canonical)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.status, ItemStatus::Unindexable);
        assert!(page.title.is_empty());
        assert!(page.content.is_empty());
    }

    #[tokio::test]
    async fn test_rss_feed_links_are_discovered() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        let rss = format!(
            r#"<rss version="2.0"><channel>
            <item><link>{0}/posts/1</link></item>
            <item><link>{0}/posts/2</link></item>
            </channel></rss>"#,
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(rss.into_bytes(), "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler
            .crawl(&source, 0, &[], &format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();

        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert_eq!(result.urls.len(), 2);
        assert_eq!(result.content.status, ItemStatus::Unindexable);
    }

    #[tokio::test]
    async fn test_invalid_feed_marks_page_error() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                b"definitely not a feed".to_vec(),
                "application/rss+xml",
            ))
            .mount(&server)
            .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler
            .crawl(&source, 0, &[], &format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();

        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert_eq!(result.content.status, ItemStatus::Error);
        assert_eq!(result.content.error_info, "Invalid feed content");
    }

    #[tokio::test]
    async fn test_meta_robots_noindex_is_an_error_page() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;
        mock_html(
            &server,
            "/hidden",
            r#"<html><head><meta name="robots" content="noindex"></head>
            <body><p>secret</p></body></html>"#,
        )
        .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler
            .crawl(&source, 0, &[], &format!("{}/hidden", server.uri()))
            .await
            .unwrap();

        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };
        assert_eq!(result.content.status, ItemStatus::Error);
        assert_eq!(result.content.error_info, "Disallowed by <meta name=\"robots\">");

        let page = store
            .get_document("example", &result.canonical)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.status, ItemStatus::Error);
    }

    #[tokio::test]
    async fn test_robots_txt_disallow_blocks_fetch() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                b"User-agent: *\nDisallow: /\n".to_vec(),
                "text/plain",
            ))
            .mount(&server)
            .await;
        mock_html(&server, "/page", "<html><body><p>should not index</p></body></html>").await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let failure = crawler
            .crawl(&source, 0, &[], &format!("{}/page", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, Error::RobotsDisallowed(_)));
        assert!(failure.canonical.is_some());
    }

    #[tokio::test]
    async fn test_size_limit_truncates_fields() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;
        mock_html(
            &server,
            "/big",
            r#"<html><head><title>Title</title>
            <meta name="description" content="A fairly long description of the page"></head>
            <body><p>Body content that will not fit in the budget at all.</p></body></html>"#,
        )
        .await;

        let mut source = test_source("example", &server.uri());
        source.size_limit = 5;
        let crawler = Crawler::new(store.clone()).unwrap();

        let outcome = crawler
            .crawl(&source, 0, &[], &format!("{}/big", server.uri()))
            .await
            .unwrap();
        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };

        let page = store.get_document_by_id(result.page_id).await.unwrap().unwrap();
        assert_eq!(page.title, "Title");
        assert!(page.description.is_empty());
        assert!(page.content.is_empty());
    }

    #[tokio::test]
    async fn test_meta_canonical_overrides_url() {
        let (store, _tmp) = setup_test_store().await;
        let server = MockServer::start().await;
        mock_html(
            &server,
            "/page",
            &format!(
                r#"<html><head><title>Canonical test</title>
                <link rel="canonical" href="{}/canonical-page"></head>
                <body><p>content</p></body></html>"#,
                server.uri()
            ),
        )
        .await;

        let source = test_source("example", &server.uri());
        let crawler = Crawler::new(store.clone()).unwrap();

        let page_url = format!("{}/page", server.uri());
        let outcome = crawler.crawl(&source, 0, &[], &page_url).await.unwrap();
        let CrawlOutcome::Indexed(result) = outcome else {
            panic!("expected an indexed page");
        };

        let expected = format!("{}/canonical-page", server.uri());
        assert_eq!(result.canonical, expected);
        let mapping = store.get_canonical("example", &page_url).await.unwrap().unwrap();
        assert_eq!(mapping.canonical, expected);
    }
}
