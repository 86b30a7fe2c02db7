//! Corpus-driven spelling correction for search queries
//!
//! The dictionary is an ordinary table rebuilt periodically from the titles
//! and content of Finished pages. Correction is token-wise: an exact
//! case-insensitive match maps to the vocabulary form, otherwise the nearest
//! word within a bounded edit distance wins, ties broken by corpus
//! frequency. Tokens with no close vocabulary word pass through unchanged,
//! so an unpopulated dictionary degenerates to the identity function.

use super::Store;
use crate::error::Result;
use crate::models::ItemStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Edit budget: tight for short tokens, two edits otherwise
fn max_edit_distance(token: &str) -> usize {
    if token.chars().count() <= 4 {
        1
    } else {
        2
    }
}

/// Levenshtein distance, early-exiting once `bound` cannot be met
fn edit_distance(a: &str, b: &str, bound: usize) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.len().abs_diff(b.len()) > bound {
        return bound + 1;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > bound {
            return bound + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

impl Store {
    /// Rebuild the vocabulary from the Finished-page corpus
    pub async fn create_spellfix_index(&self) -> Result<()> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT title, content FROM pages WHERE status = ?")
                .bind(ItemStatus::Finished)
                .fetch_all(self.pool())
                .await?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for (title, content) in &rows {
            for field in [title, content] {
                for word in WORD.find_iter(field) {
                    *counts.entry(word.as_str().to_lowercase()).or_insert(0) += 1;
                }
            }
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("DROP TABLE IF EXISTS search_vocab")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE TABLE search_vocab (word TEXT PRIMARY KEY, occurrences INTEGER NOT NULL)",
        )
        .execute(&mut *tx)
        .await?;

        for (word, occurrences) in counts {
            sqlx::query("INSERT INTO search_vocab (word, occurrences) VALUES (?, ?)")
                .bind(word)
                .bind(occurrences)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove the vocabulary to free disk space
    pub async fn drop_spellfix_index(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS search_vocab")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Correct each query token against the vocabulary.
    ///
    /// Returns the query unchanged when no vocabulary has been built.
    pub async fn spellfix(&self, query: &str) -> Result<String> {
        let initialized: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'search_vocab'",
        )
        .fetch_optional(self.pool())
        .await?;
        if initialized.is_none() {
            return Ok(query.to_string());
        }

        let mut corrected = Vec::new();
        for token in query.split_whitespace() {
            corrected.push(self.fix_token(token).await?);
        }

        Ok(corrected.join(" "))
    }

    async fn fix_token(&self, token: &str) -> Result<String> {
        let lower = token.to_lowercase();

        let exact: Option<String> =
            sqlx::query_scalar("SELECT word FROM search_vocab WHERE word = ?")
                .bind(&lower)
                .fetch_optional(self.pool())
                .await?;
        if let Some(word) = exact {
            return Ok(word);
        }

        let Some(first) = lower.chars().next() else {
            return Ok(token.to_string());
        };
        let bound = max_edit_distance(&lower);
        let len = lower.chars().count() as i64;

        // Candidate pruning mirrors spellfix-style heuristics: same leading
        // character, similar length, most frequent words first.
        let candidates: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT word, occurrences FROM search_vocab
            WHERE substr(word, 1, 1) = ? AND length(word) BETWEEN ? AND ?
            ORDER BY occurrences DESC LIMIT 200
            "#,
        )
        .bind(first.to_string())
        .bind(len - bound as i64)
        .bind(len + bound as i64)
        .fetch_all(self.pool())
        .await?;

        let mut best: Option<(usize, i64, String)> = None;
        for (word, occurrences) in candidates {
            let distance = edit_distance(&lower, &word, bound);
            if distance > bound {
                continue;
            }
            let better = match &best {
                None => true,
                Some((d, occ, _)) => distance < *d || (distance == *d && occurrences > *occ),
            };
            if better {
                best = Some((distance, occurrences, word));
            }
        }

        Ok(best.map(|(_, _, word)| word).unwrap_or_else(|| token.to_string()))
    }
}
