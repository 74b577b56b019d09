//! Full-text helpers shared by search and the `CONTAINS` constraint.

use std::collections::HashSet;
use std::sync::OnceLock;

fn stop_words() -> &'static HashSet<&'static str> {
    static STOP_WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOP_WORDS.get_or_init(|| {
        [
            "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
            "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has",
            "had", "do", "does", "did", "will", "would", "should", "could", "this", "that",
            "these", "those",
        ]
        .into_iter()
        .collect()
    })
}

/// Split text into lowercase terms on anything that is not a letter or digit.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| term.to_lowercase())
        .collect()
}

/// Terms of a search expression: stop words and single characters are dropped unless
/// nothing else is left.
pub fn search_terms(expression: &str) -> Vec<String> {
    let all = terms(expression);
    let kept: Vec<String> = all
        .iter()
        .filter(|term| term.chars().count() >= 2 && !stop_words().contains(term.as_str()))
        .cloned()
        .collect();
    if kept.is_empty() {
        all
    } else {
        kept
    }
}

fn quoted(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// FTS5 MATCH expression where any term may match. `None` when there is nothing to search for.
///
/// Terms are quoted so punctuation never reaches the FTS5 query syntax.
pub fn sanitize_fts5_query(expression: &str) -> Option<String> {
    let terms = search_terms(expression);
    if terms.is_empty() {
        return None;
    }
    Some(terms.iter().map(|t| quoted(t)).collect::<Vec<_>>().join(" OR "))
}

/// FTS5 MATCH expression requiring every term.
pub fn all_terms_fts5_query(expression: &str) -> Option<String> {
    let terms = search_terms(expression);
    if terms.is_empty() {
        return None;
    }
    Some(terms.iter().map(|t| quoted(t)).collect::<Vec<_>>().join(" AND "))
}

/// Map a bm25 score (negative, lower is better) into 0..1 where higher is better.
pub fn normalize_bm25_score(raw_score: f64) -> f32 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    (1.0 / (1.0 + raw_score.exp())) as f32
}
