//! Main-content extraction
//!
//! A lightweight readability pass: score container elements by how much
//! paragraph-like text they hold versus link text, pick the densest one, and
//! re-run the text walker over that subtree so word boundaries follow the
//! same rules as the whole-document fallback.

use super::text_content;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static CANDIDATES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, main, section, div, td, body").unwrap());
static PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, pre, blockquote, li, h1, h2, h3, h4, h5, h6").unwrap());
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());

/// Minimum score before a candidate is considered an article at all
const MIN_SCORE: f64 = 25.0;

fn text_len(element: ElementRef<'_>) -> usize {
    element.text().map(|t| t.trim().len()).sum()
}

fn score(element: ElementRef<'_>) -> f64 {
    let total = text_len(element);
    if total < 25 {
        return 0.0;
    }

    let paragraph_text: usize = element
        .select(&PARAGRAPHS)
        .map(|p| p.text().map(|t| t.trim().len()).sum::<usize>())
        .sum();

    let link_text: usize = element.select(&LINKS).map(text_len).sum();
    let link_density = link_text as f64 / total as f64;

    paragraph_text as f64 * (1.0 - link_density)
}

/// Extract the readable text of the document's main content, or `None` when
/// no candidate scores high enough.
pub fn extract_article(doc: &Html) -> Option<String> {
    let best = doc
        .select(&CANDIDATES)
        .map(|el| (score(el), el))
        .filter(|(s, _)| *s >= MIN_SCORE)
        .max_by(|(a, _), (b, _)| a.total_cmp(b))?;

    let text = text_content(*best.1);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
