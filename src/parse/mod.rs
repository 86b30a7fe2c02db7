//! HTML text extraction
//!
//! `extract` is a pure step: it parses a fetched document and returns
//! everything the crawler needs — title, description, readable text, the
//! canonical link, alternate feeds, and outbound anchors — with no I/O, so
//! the caller can resolve canonicals against the store afterwards.

mod readability;

use crate::models::ItemStatus;
use ego_tree::NodeRef;
use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{Html, Selector};
use url::Url;

/// Elements that never contain useful text
const NON_TEXT_ELEMENTS: &[&str] =
    &["head", "meta", "script", "style", "noscript", "object", "svg"];

/// Elements rendered as blocks by a standard user-agent stylesheet, plus
/// `li`, which also starts a new line.
const BLOCK_ELEMENTS: &[&str] = &[
    "html", "body", "p", "address", "article", "aside", "div", "footer", "header", "hgroup",
    "main", "nav", "section", "blockquote", "figcaption", "figure", "center", "hr", "h1", "h2",
    "h3", "h4", "h5", "h6", "tr", "ul", "ol", "dd", "dl", "dt", "menu", "dir", "form", "legend",
    "fieldset", "optgroup", "option", "pre", "xmp", "plaintext", "listing", "dialog", "li",
];

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META_ROBOTS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[name=robots]").unwrap());
static META_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[name=description]").unwrap());
static LINK_CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel=canonical]").unwrap());
static LINK_ALTERNATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel=alternate]").unwrap());
static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());

/// Everything learned from one HTML document
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub status: Option<ItemStatus>,
    pub title: String,
    pub description: String,
    pub content: String,
    pub error_info: String,
    /// Absolute URL from `<link rel=canonical>`, when present
    pub canonical: Option<String>,
    /// Absolute URLs of alternate representations worth crawling
    pub alternates: Vec<String>,
    /// Absolute anchor targets, `rel=nofollow` excluded
    pub anchors: Vec<String>,
}

/// Parse a document and extract its indexable content and outbound links
pub fn extract(html: &str, base: &Url) -> ExtractedPage {
    let doc = Html::parse_document(html);
    let mut page = ExtractedPage::default();

    collect_links(&doc, base, &mut page);

    if let Some(meta) = doc.select(&META_ROBOTS).next() {
        if let Some(content) = meta.value().attr("content") {
            if content.contains("noindex") || content.contains("none") {
                page.status = Some(ItemStatus::Error);
                page.error_info = "Disallowed by <meta name=\"robots\">".to_string();
                return page;
            }
        }
    }

    page.status = Some(ItemStatus::Finished);

    page.title = doc
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    if page.title.is_empty() {
        if let Some(h1) = doc.select(&H1).next() {
            page.title = h1.text().collect::<String>().trim().to_string();
        }
    }

    page.description = doc
        .select(&META_DESCRIPTION)
        .next()
        .and_then(|m| m.value().attr("content"))
        .unwrap_or_default()
        .to_string();

    // Prefer the readability pass; fall back to walking the whole document
    // when it finds nothing usable.
    page.content = readability::extract_article(&doc)
        .unwrap_or_else(|| text_content(doc.tree.root()));

    page
}

fn collect_links(doc: &Html, base: &Url, page: &mut ExtractedPage) {
    if let Some(link) = doc.select(&LINK_CANONICAL).next() {
        if let Some(href) = link.value().attr("href") {
            if let Ok(resolved) = base.join(href) {
                page.canonical = Some(resolved.to_string());
            }
        }
    }

    for link in doc.select(&LINK_ALTERNATE) {
        let link_type = link.value().attr("type").unwrap_or_default();
        if matches!(
            link_type,
            "application/atom+xml" | "application/rss+xml" | "text/html"
        ) {
            if let Some(href) = link.value().attr("href") {
                if let Ok(resolved) = base.join(href) {
                    page.alternates.push(resolved.to_string());
                }
            }
        }
    }

    for anchor in doc.select(&ANCHORS) {
        if anchor
            .value()
            .attr("rel")
            .is_some_and(|rel| rel.contains("nofollow"))
        {
            continue;
        }
        if let Some(href) = anchor.value().attr("href") {
            if let Ok(resolved) = base.join(href) {
                page.anchors.push(resolved.to_string());
            }
        }
    }
}

/// Depth-first text collection: spaces between runs, newlines around
/// block-level elements, `title` attributes and image alt text included.
pub fn text_content(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    walk(node, &mut out);
    out.trim().to_string()
}

fn walk(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push_str(trimmed);
                out.push(' ');
            }
        }
        Node::Element(element) => {
            let name = element.name();
            if NON_TEXT_ELEMENTS.contains(&name) {
                return;
            }

            let is_block = BLOCK_ELEMENTS.contains(&name);
            if is_block {
                out.push('\n');
            }

            for child in node.children() {
                walk(child, out);
            }

            if let Some(title) = element.attr("title") {
                if !title.trim().is_empty() {
                    out.push_str(title.trim());
                    out.push(' ');
                }
            }
            if name == "img" {
                if let Some(alt) = element.attr("alt") {
                    if !alt.trim().is_empty() {
                        out.push_str(alt.trim());
                        out.push('\n');
                    }
                }
            }

            if is_block {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                walk(child, out);
            }
        }
    }
}

/// Fit the fields into a combined byte budget, filling earlier fields first.
/// Later fields are emptied once the budget runs out; a partially-fitting
/// field is cut at a character boundary.
pub fn truncate(max: usize, items: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    let mut remaining = max;

    for item in items {
        if item.len() <= remaining {
            out.push(item.to_string());
            remaining -= item.len();
        } else if remaining > 0 {
            let mut cut = remaining;
            while cut > 0 && !item.is_char_boundary(cut) {
                cut -= 1;
            }
            out.push(item[..cut].to_string());
            remaining -= cut;
        } else {
            out.push(String::new());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.example.com/docs/page").unwrap()
    }

    #[test]
    fn test_extract_basic_page() {
        let html = r#"
        <!DOCTYPE html>
        <html>
        <head>
            <title>Test Page</title>
            <meta name="description" content="A test document">
        </head>
        <body>
            <h1>Main Heading</h1>
            <p>Some paragraph text here.</p>
            <a href="/other">Link</a>
            <a href="https://external.test/page" rel="nofollow">Skipped</a>
        </body>
        </html>
        "#;

        let page = extract(html, &base());

        assert_eq!(page.status, Some(ItemStatus::Finished));
        assert_eq!(page.title, "Test Page");
        assert_eq!(page.description, "A test document");
        assert!(page.content.contains("Main Heading"));
        assert!(page.content.contains("paragraph text"));
        assert_eq!(page.anchors, vec!["https://www.example.com/other"]);
    }

    #[test]
    fn test_extract_meta_robots_noindex() {
        let html = r#"
        <html>
        <head><meta name="robots" content="noindex, follow"></head>
        <body><p>Hidden</p><a href="/next">next</a></body>
        </html>
        "#;

        let page = extract(html, &base());
        assert_eq!(page.status, Some(ItemStatus::Error));
        assert_eq!(page.error_info, "Disallowed by <meta name=\"robots\">");
        assert!(page.content.is_empty());
        // Links are still collected so the crawl can continue past the page
        assert_eq!(page.anchors, vec!["https://www.example.com/next"]);
    }

    #[test]
    fn test_extract_canonical_and_alternates() {
        let html = r#"
        <html>
        <head>
            <link rel="canonical" href="https://www.example.com/canonical">
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
            <link rel="alternate" type="application/pdf" href="/doc.pdf">
        </head>
        <body><p>text</p></body>
        </html>
        "#;

        let page = extract(html, &base());
        assert_eq!(
            page.canonical.as_deref(),
            Some("https://www.example.com/canonical")
        );
        assert_eq!(page.alternates, vec!["https://www.example.com/feed.xml"]);
    }

    #[test]
    fn test_extract_title_falls_back_to_h1() {
        let html = "<html><body><h1>Fallback Title</h1><p>body</p></body></html>";
        let page = extract(html, &base());
        assert_eq!(page.title, "Fallback Title");
    }

    #[test]
    fn test_walker_inserts_word_boundaries() {
        let html = Html::parse_document(
            "<html><body><p>Hello</p><p>world</p><span>a</span><span>b</span></body></html>",
        );
        let text = text_content(html.tree.root());

        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("Helloworld"));
        assert!(!text.contains("ab"));
    }

    #[test]
    fn test_walker_skips_non_text_and_emits_attrs() {
        let html = Html::parse_document(
            r#"<html><head><script>var x = 1;</script></head>
            <body>
              <style>.c { color: red }</style>
              <abbr title="HyperText Markup Language">HTML</abbr>
              <img src="x.png" alt="A diagram">
            </body></html>"#,
        );
        let text = text_content(html.tree.root());

        assert!(!text.contains("var x"));
        assert!(!text.contains("color"));
        assert!(text.contains("HyperText Markup Language"));
        assert!(text.contains("A diagram"));
    }

    #[test]
    fn test_truncate_law() {
        let cases: &[(usize, &[&str], &[&str])] = &[
            (5, &["123", "45", "6"], &["123", "45", ""]),
            (6, &["123", "45", "6"], &["123", "45", "6"]),
            (10, &["123", "45", "6"], &["123", "45", "6"]),
            (2, &["123", "45", "6"], &["12", "", ""]),
            (5, &["lorem ipsum"], &["lorem"]),
            (
                5,
                &["lorem", "", "", "", "", "", "ipsum"],
                &["lorem", "", "", "", "", "", ""],
            ),
            (
                10,
                &["lorem", "", "", "", "", "", "ipsum"],
                &["lorem", "", "", "", "", "", "ipsum"],
            ),
        ];

        for (max, items, expected) in cases {
            assert_eq!(&truncate(*max, items), expected, "truncate({max}, {items:?})");
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let out = truncate(5, &["héllo"]);
        // 'é' is two bytes; the cut lands before it rather than inside it
        assert!(out[0].len() <= 5);
        assert!("héllo".starts_with(&out[0]));
    }
}
