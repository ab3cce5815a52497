//! Text helpers
//!
//! Tokenization, Jaccard overlap, and weighted keyword extraction shared by
//! recall gating, summaries, and the manifest generator.

use std::collections::{HashMap, HashSet};

/// Small stop-word filter for keyword extraction
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "their", "this", "to", "was", "were",
    "will", "with", "not", "no", "so", "we", "you", "i",
];

/// Lowercased alphanumeric tokens, order preserved
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Whether a token passes the stop-word filter
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Jaccard overlap between two token sets
pub fn jaccard<'a, I, J>(a: I, b: J) -> f64
where
    I: IntoIterator<Item = &'a str>,
    J: IntoIterator<Item = &'a str>,
{
    let a: HashSet<&str> = a.into_iter().collect();
    let b: HashSet<&str> = b.into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Top keywords from weighted documents
///
/// Each document contributes its tokens at the document's weight; stop
/// words and single characters are filtered. Ties break alphabetically so
/// the output is deterministic.
pub fn top_keywords<'a>(docs: impl IntoIterator<Item = (&'a str, f64)>, limit: usize) -> Vec<String> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (text, weight) in docs {
        for token in tokenize(text) {
            if !is_stop_word(&token) {
                *scores.entry(token).or_insert(0.0) += weight;
            }
        }
    }
    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.into_iter().take(limit).map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_punctuation_and_singles() {
        assert_eq!(
            tokenize("Spreading-activation models, e.g. memory!"),
            vec!["spreading", "activation", "models", "memory"]
        );
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(["a", "b"], ["b", "c"]), 1.0 / 3.0);
        assert_eq!(jaccard(["a"], ["a"]), 1.0);
        assert_eq!(jaccard([], []), 0.0);
        assert_eq!(jaccard(["a"], ["b"]), 0.0);
    }

    #[test]
    fn test_top_keywords_weighted() {
        let docs = [
            ("cache eviction policy", 3.0),
            ("cache warmup", 1.0),
            ("the the the", 10.0),
        ];
        let keywords = top_keywords(docs.iter().map(|(t, w)| (*t, *w)), 2);
        assert_eq!(keywords[0], "cache");
        assert!(!keywords.contains(&"the".to_string()));
    }
}
