//! Sitemap XML parsing
//!
//! Handles both `<urlset>` sitemaps and `<sitemapindex>` index files. Index
//! entries are returned alongside page URLs; the crawler enqueues them like
//! any other URL and parses them as sitemaps when their turn comes.
//!
//! Parsing uses plain string extraction. The documents are machine-generated
//! and regular enough that a full XML parser buys nothing here.

/// Collect every `<loc>` from a sitemap or sitemap index document
pub fn parse_sitemap(content: &str) -> Vec<String> {
    let mut locations = Vec::new();

    for block in split_blocks(content, "url") {
        if let Some(loc) = extract_tag(block, "loc") {
            locations.push(loc);
        }
    }

    for block in split_blocks(content, "sitemap") {
        if let Some(loc) = extract_tag(block, "loc") {
            locations.push(loc);
        }
    }

    locations
}

/// Iterate the inner text of every `<tag>...</tag>` block
fn split_blocks<'a>(content: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
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

/// Extract trimmed text content from an XML tag
pub(crate) fn extract_tag(content: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{tag}>");
    let end_tag = format!("</{tag}>");

    content.find(&start_tag).and_then(|start| {
        let value_start = start + start_tag.len();
        content[value_start..].find(&end_tag).map(|end| {
            content[value_start..value_start + end]
                .trim()
                .trim_start_matches("<![CDATA[")
                .trim_end_matches("]]>")
                .trim()
                .to_string()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag() {
        let xml = "<loc>https://example.com/page</loc>";
        assert_eq!(
            extract_tag(xml, "loc"),
            Some("https://example.com/page".to_string())
        );
        assert_eq!(extract_tag(xml, "lastmod"), None);
    }

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url>
                <loc>https://example.com/page1</loc>
                <lastmod>2024-01-01</lastmod>
            </url>
            <url>
                <loc>https://example.com/page2</loc>
            </url>
        </urlset>"#;

        let locations = parse_sitemap(xml);
        assert_eq!(
            locations,
            vec!["https://example.com/page1", "https://example.com/page2"]
        );
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap>
            <sitemap><loc>https://example.com/sitemap-b.xml</loc></sitemap>
        </sitemapindex>"#;

        let locations = parse_sitemap(xml);
        assert_eq!(
            locations,
            vec![
                "https://example.com/sitemap-a.xml",
                "https://example.com/sitemap-b.xml"
            ]
        );
    }

    #[test]
    fn test_parse_cdata_loc() {
        let xml = "<urlset><url><loc><![CDATA[https://example.com/x]]></loc></url></urlset>";
        assert_eq!(parse_sitemap(xml), vec!["https://example.com/x"]);
    }

    #[test]
    fn test_parse_garbage_yields_nothing() {
        assert!(parse_sitemap("not xml at all").is_empty());
    }
}
