//! URL canonicalization
//!
//! The canonical string is the identity the rest of the pipeline uses for a
//! page. Known mappings (learned from redirects and `<link rel=canonical>`)
//! short-circuit normalization, and stored canonicals are always fixed
//! points: chains are collapsed when the mapping is recorded.

use crate::error::Result;
use crate::store::Store;
use url::Url;

/// Resolve a URL to its canonical form for a source.
///
/// A stored mapping wins; otherwise the URL is normalized in place.
pub async fn canonicalize(store: &Store, source_id: &str, url: &str) -> Result<String> {
    if let Some(stored) = store.get_canonical(source_id, url).await? {
        return Ok(stored.canonical);
    }

    let parsed = Url::parse(url)?;
    Ok(normalize(&parsed))
}

/// Normalize a URL without consulting the store:
/// strip one trailing slash, drop fragments that contain no slash (slashed
/// fragments may drive client-side routing), and sort query pairs by key.
pub fn normalize(url: &Url) -> String {
    let mut url = url.clone();

    if let Some(fragment) = url.fragment() {
        if !fragment.contains('/') {
            url.set_fragment(None);
        }
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(&path[..path.len() - 1]);
    }

    let mut out = url.to_string();
    // A bare origin keeps no trailing slash either
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        if let Some(stripped) = out.strip_suffix('/') {
            out = stripped.to_string();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::setup_test_store;

    fn normalize_str(input: &str) -> String {
        normalize(&Url::parse(input).unwrap())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_str("https://www.example.com"), "https://www.example.com");
        assert_eq!(normalize_str("https://www.example.com/"), "https://www.example.com");
        assert_eq!(normalize_str("https://example.com/docs/"), "https://example.com/docs");
        assert_eq!(
            normalize_str("https://example.com/page#section"),
            "https://example.com/page"
        );
        // Slashed fragments may matter for client-side routing
        assert_eq!(
            normalize_str("https://example.com/app#/route"),
            "https://example.com/app#/route"
        );
        assert_eq!(
            normalize_str("https://example.com/q?b=2&a=1"),
            "https://example.com/q?a=1&b=2"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "https://www.example.com/",
            "https://example.com/docs/",
            "https://example.com/page#top",
            "https://example.com/app#/route",
            "https://example.com/q?b=2&a=1&c=3",
        ];
        for input in inputs {
            let once = normalize_str(input);
            let twice = normalize_str(&once);
            assert_eq!(once, twice, "normalize not idempotent for {input}");
        }
    }

    #[tokio::test]
    async fn test_stored_canonical_short_circuits() {
        let (store, _tmp) = setup_test_store().await;

        store
            .set_canonical("s", "https://example.com/old/", "https://example.com/new")
            .await
            .unwrap();

        let canonical = canonicalize(&store, "s", "https://example.com/old/")
            .await
            .unwrap();
        assert_eq!(canonical, "https://example.com/new");

        // Unknown URLs fall back to normalization
        let canonical = canonicalize(&store, "s", "https://example.com/other/")
            .await
            .unwrap();
        assert_eq!(canonical, "https://example.com/other");
    }
}
