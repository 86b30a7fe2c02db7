//! Feed link extraction: RSS, Atom, and JSON Feed
//!
//! Only the item links matter here; everything else in the feed is ignored.
//! XML feeds use the same string-extraction approach as the sitemap parser;
//! JSON feeds go through serde_json.

use super::sitemap::extract_tag;
use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Deserialize)]
struct JsonFeed {
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Deserialize)]
struct JsonFeedItem {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
}

/// Extract every item link from a feed document.
///
/// Returns a parse error when the document is not recognizable as any feed
/// format; individual malformed entries are skipped, not fatal.
pub fn parse_feed(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim_start();

    if trimmed.starts_with('{') {
        let feed: JsonFeed =
            serde_json::from_str(trimmed).map_err(|_| Error::Parse("Invalid feed content".into()))?;
        let mut links = Vec::new();
        for item in feed.items {
            if let Some(url) = item.url {
                links.push(url);
            }
            if let Some(url) = item.external_url {
                links.push(url);
            }
        }
        return Ok(links);
    }

    if content.contains("<rss") || content.contains("<channel") {
        let mut links = Vec::new();
        for block in blocks(content, "item") {
            if let Some(link) = extract_tag(block, "link") {
                if !link.is_empty() {
                    links.push(link);
                }
            }
        }
        return Ok(links);
    }

    if content.contains("<feed") {
        let mut links = Vec::new();
        for block in blocks(content, "entry") {
            links.extend(link_hrefs(block));
        }
        return Ok(links);
    }

    Err(Error::Parse("Invalid feed content".into()))
}

fn blocks<'a>(content: &'a str, tag: &'static str) -> impl Iterator<Item = &'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let mut rest = content;
    std::iter::from_fn(move || {
        let start = rest.find(&open)?;
        let after = &rest[start + open.len()..];
        let end = after.find(&close)?;
        let block = &after[..end];
        rest = &after[end + close.len()..];
        Some(block)
    })
}

/// `href` attributes of every `<link .../>` element in an Atom entry
fn link_hrefs(block: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    let mut rest = block;

    while let Some(start) = rest.find("<link") {
        let after = &rest[start + 5..];
        let Some(end) = after.find('>') else {
            break;
        };
        let tag = &after[..end];
        if let Some(href) = attr_value(tag, "href") {
            hrefs.push(href);
        }
        rest = &after[end + 1..];
    }

    hrefs
}

fn attr_value(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(tag[start..start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rss() {
        let rss = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
            <title>Example Feed</title>
            <item>
                <title>First post</title>
                <link>https://example.com/posts/1</link>
            </item>
            <item>
                <title>Second post</title>
                <link>https://example.com/posts/2</link>
            </item>
        </channel></rss>"#;

        let links = parse_feed(rss).unwrap();
        assert_eq!(
            links,
            vec!["https://example.com/posts/1", "https://example.com/posts/2"]
        );
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
            <title>Example</title>
            <entry>
                <title>Post</title>
                <link rel="alternate" href="https://example.com/posts/1"/>
            </entry>
        </feed>"#;

        let links = parse_feed(atom).unwrap();
        assert_eq!(links, vec!["https://example.com/posts/1"]);
    }

    #[test]
    fn test_parse_json_feed() {
        let json = r#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "Example",
            "items": [
                { "id": "1", "url": "https://example.com/posts/1" },
                { "id": "2", "url": "https://example.com/posts/2",
                  "external_url": "https://elsewhere.test/article" }
            ]
        }"#;

        let links = parse_feed(json).unwrap();
        assert_eq!(
            links,
            vec![
                "https://example.com/posts/1",
                "https://example.com/posts/2",
                "https://elsewhere.test/article"
            ]
        );
    }

    #[test]
    fn test_invalid_feed_is_an_error() {
        assert!(parse_feed("plain text, no feed here").is_err());
        assert!(parse_feed("{ not valid json").is_err());
    }

    #[test]
    fn test_items_without_links_are_skipped() {
        let rss = r#"<rss><channel>
            <item><title>No link</title></item>
            <item><link>https://example.com/ok</link></item>
        </channel></rss>"#;
        assert_eq!(parse_feed(rss).unwrap(), vec!["https://example.com/ok"]);
    }
}
