//! Token-aware recursive text splitting
//!
//! Pages are split into chunks before embedding. The splitter prefers the
//! largest separator that still appears in the text, recursing into finer
//! ones until every piece fits; adjacent chunks share `chunk_overlap` tokens
//! of context. Token counts use the cl100k byte-pair encoding so chunk sizes
//! line up with what the embedding model sees.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Separators in decreasing priority. The CJK entries let text without word
/// boundaries still split at sentence punctuation; the empty string is the
/// final per-character fallback.
const SEPARATORS: &[&str] = &[
    "\n\n",
    "\n",
    " ",
    ".",
    ",",
    "\u{200b}", // zero-width space
    "\u{ff0c}", // fullwidth comma
    "\u{3001}", // ideographic comma
    "\u{ff0e}", // fullwidth full stop
    "\u{3002}", // ideographic full stop
    "",
];

static ENCODER: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base encoding is embedded"));

/// Number of BPE tokens in a string
pub fn count_tokens(text: &str) -> usize {
    ENCODER.encode_ordinary(text).len()
}

/// Split `text` into chunks of at most `chunk_size` tokens, with roughly
/// `chunk_overlap` tokens shared between neighbors.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size / 2);
    split_recursive(text, SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    // Pick the first separator that occurs in the text; "" always matches.
    let mut separator = *separators.last().unwrap_or(&"");
    let mut remaining: &[&str] = &[];
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            separator = sep;
            remaining = &separators[i + 1..];
            break;
        }
    }

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator).map(str::to_string).collect()
    };

    let mut chunks = Vec::new();
    let mut good_splits: Vec<String> = Vec::new();

    for split in splits {
        if count_tokens(&split) < chunk_size {
            good_splits.push(split);
            continue;
        }

        if !good_splits.is_empty() {
            chunks.extend(merge_splits(&good_splits, separator, chunk_size, chunk_overlap));
            good_splits.clear();
        }

        if remaining.is_empty() {
            chunks.push(split);
        } else {
            chunks.extend(split_recursive(&split, remaining, chunk_size, chunk_overlap));
        }
    }

    if !good_splits.is_empty() {
        chunks.extend(merge_splits(&good_splits, separator, chunk_size, chunk_overlap));
    }

    chunks
}

/// Greedily pack splits into chunks up to the token budget, carrying an
/// overlap window between consecutive chunks.
fn merge_splits(
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let separator_len = count_tokens(separator);

    let mut docs = Vec::new();
    let mut current: std::collections::VecDeque<&String> = std::collections::VecDeque::new();
    let mut total = 0usize;

    for split in splits {
        let split_len = count_tokens(split);
        let mut total_with_split = total + split_len;
        if !current.is_empty() {
            total_with_split += separator_len;
        }

        if total_with_split > chunk_size && !current.is_empty() {
            if let Some(doc) = join_docs(&current, separator) {
                docs.push(doc);
            }

            while total > chunk_overlap
                || (total + split_len + if current.is_empty() { 0 } else { separator_len }
                    > chunk_size
                    && total > 0)
            {
                let Some(first) = current.pop_front() else {
                    break;
                };
                total -= count_tokens(first);
                if !current.is_empty() {
                    total -= separator_len;
                }
            }
        }

        current.push_back(split);
        total += split_len;
        if current.len() > 1 {
            total += separator_len;
        }
    }

    if let Some(doc) = join_docs(&current, separator) {
        docs.push(doc);
    }

    docs
}

fn join_docs(parts: &std::collections::VecDeque<&String>, separator: &str) -> Option<String> {
    let joined = parts
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(separator)
        .trim()
        .to_string();

    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
