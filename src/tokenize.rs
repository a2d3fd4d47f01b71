//! Lowercase word tokenizer and stopword filter.
//!
//! [`tokenize`] is the single tokenization rule shared by the BM25 index,
//! query handling, and the conversation worker: lowercase, replace every
//! non-word character with a space, split on whitespace, drop tokens
//! shorter than three characters.
//!
//! Stopword filtering is deliberately *not* baked into `tokenize` —
//! callers decide per use case. Query reformulation always drops
//! stopwords; the stored document length keeps them.

/// Exact-match English stopword set applied by callers.
const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can",
    "did", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "her", "here", "hers", "him",
    "his", "how", "into", "its", "itself", "just", "more", "most", "not",
    "now", "off", "once", "only", "other", "our", "ours", "out", "over",
    "own", "same", "she", "should", "some", "such", "than", "that", "the",
    "their", "theirs", "them", "then", "there", "these", "they", "this",
    "those", "through", "too", "under", "until", "very", "was", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "you", "your", "yours",
];

/// Split text into lowercase word tokens.
///
/// Word characters are ASCII alphanumerics plus underscore; everything
/// else acts as a separator. Tokens shorter than three characters are
/// discarded. Pure and deterministic.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        // Tokens are pure ASCII here, so byte length is character count.
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_string())
        .collect()
}

/// True if `term` is in the fixed stopword set.
pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Drop stopwords from a token sequence, preserving order and duplicates.
pub fn filter_stopwords(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| !is_stopword(t))
        .cloned()
        .collect()
}
