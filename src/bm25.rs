//! Okapi BM25 relevance index.
//!
//! [`Bm25Index`] keeps corpus-level statistics only — a term → document
//! frequency map, per-document token lengths, and the running average
//! length. It never stores raw text, which keeps the serialized blob
//! small but means [`remove_document`](Bm25Index::remove_document) must
//! be handed the same text that was indexed.
//!
//! Scoring follows standard Okapi BM25:
//!
//! ```text
//! score(d, q) = Σ idf(t) · tf(t,d)·(k1+1) / (tf(t,d) + k1·(1 − b + b·len(d)/avgLen))
//! idf(t)      = ln((N − df(t) + 0.5) / (df(t) + 0.5) + 1)
//! ```
//!
//! with `idf` clamped to zero when the corpus is empty or the term is
//! unknown. All operations are total over well-formed inputs; only
//! [`deserialize`](Bm25Index::deserialize) can fail.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tokenize::{filter_stopwords, is_stopword, tokenize};

/// Default term-frequency saturation parameter.
const DEFAULT_K1: f64 = 1.5;
/// Default document-length normalization parameter.
const DEFAULT_B: f64 = 0.75;

/// A document offered to [`Bm25Index::rank_documents`] for scoring.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Document (or chunk) id, used to look up the stored length.
    pub id: String,
    /// Searchable text to score the query against.
    pub text: String,
}

/// A scored candidate, referring back into the input slice by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    /// Index of the candidate in the slice passed to `rank_documents`.
    pub index: usize,
    /// BM25 relevance score (0.0 for the unranked pass-through case).
    pub score: f64,
}

/// Summary counters for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct Bm25Stats {
    pub total_docs: usize,
    pub vocabulary_size: usize,
    pub avg_doc_length: f64,
}

/// Serialized wire format for the index blob.
///
/// Statistics only, per the index design — the manifest holds the text.
#[derive(Serialize, Deserialize)]
struct SerializedIndex {
    version: u32,
    term_document_frequency: HashMap<String, u32>,
    total_document_count: usize,
    average_document_length: f64,
    document_length_by_id: HashMap<String, usize>,
    k1: f64,
    b: f64,
}

/// Incremental BM25 index over document statistics.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    /// term → number of distinct documents containing it (non-stopword terms only).
    term_document_frequency: HashMap<String, u32>,
    total_document_count: usize,
    average_document_length: f64,
    /// id → raw token count, stopwords included.
    document_length_by_id: HashMap<String, usize>,
    k1: f64,
    b: f64,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            term_document_frequency: HashMap::new(),
            total_document_count: 0,
            average_document_length: 0.0,
            document_length_by_id: HashMap::new(),
            k1,
            b,
        }
    }

    /// Add a document's statistics to the index.
    ///
    /// Document length is the raw token count (stopwords included);
    /// document frequency counts each unique non-stopword term once.
    /// Adding an id that is already present is a no-op — callers that
    /// re-index must remove the old entry first.
    pub fn add_document(&mut self, id: &str, text: &str) {
        if self.document_length_by_id.contains_key(id) {
            return;
        }

        let tokens = tokenize(text);
        let doc_length = tokens.len();

        for term in unique_terms(&tokens) {
            *self.term_document_frequency.entry(term).or_insert(0) += 1;
        }

        self.document_length_by_id.insert(id.to_string(), doc_length);
        self.total_document_count += 1;
        self.recompute_average_length();
    }

    /// Remove a document's statistics, given the text it was indexed with.
    ///
    /// Term entries that reach zero are deleted. Removing an absent id
    /// is a no-op.
    pub fn remove_document(&mut self, id: &str, text: &str) {
        if self.document_length_by_id.remove(id).is_none() {
            return;
        }

        let tokens = tokenize(text);
        for term in unique_terms(&tokens) {
            if let Some(df) = self.term_document_frequency.get_mut(&term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.term_document_frequency.remove(&term);
                }
            }
        }

        self.total_document_count = self.total_document_count.saturating_sub(1);
        self.recompute_average_length();
    }

    /// Score and rank candidates against a query.
    ///
    /// If no query terms survive stopword filtering, every candidate is
    /// returned with score 0.0 in input order (unranked pass-through —
    /// a policy, not an error). Otherwise candidates scoring below
    /// `min_score` are dropped, the rest are sorted by descending score
    /// and truncated to `top_k` when given.
    pub fn rank_documents(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: Option<usize>,
        min_score: f64,
    ) -> Vec<Ranked> {
        let query_terms = self.query_terms(query);

        if query_terms.is_empty() {
            return candidates
                .iter()
                .enumerate()
                .map(|(index, _)| Ranked { index, score: 0.0 })
                .collect();
        }

        let mut ranked: Vec<Ranked> = candidates
            .iter()
            .enumerate()
            .map(|(index, cand)| Ranked {
                index,
                score: self.score_candidate(cand, &query_terms),
            })
            .filter(|r| r.score >= min_score)
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(k) = top_k {
            ranked.truncate(k);
        }

        ranked
    }

    /// Extract the query's most distinctive terms by TF-IDF against the
    /// corpus. Used to shrink long natural-language queries to a short
    /// term list.
    pub fn reformulate_query(&self, query: &str, top_k: usize) -> Vec<String> {
        let terms = filter_stopwords(&tokenize(query));
        if terms.is_empty() {
            return Vec::new();
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for term in &terms {
            *tf.entry(term.as_str()).or_insert(0) += 1;
        }

        let mut scored: Vec<(&str, f64)> = tf
            .into_iter()
            .map(|(term, count)| (term, count as f64 * self.idf(term)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(term, _)| term.to_string())
            .collect()
    }

    /// Query terms that exist in the index vocabulary, in query order.
    pub fn get_matching_terms(&self, query: &str) -> Vec<String> {
        self.query_terms(query)
            .into_iter()
            .filter(|t| self.term_document_frequency.contains_key(t))
            .collect()
    }

    /// Round-trip the full internal state to a JSON string.
    pub fn serialize(&self) -> String {
        let wire = SerializedIndex {
            version: 1,
            term_document_frequency: self.term_document_frequency.clone(),
            total_document_count: self.total_document_count,
            average_document_length: self.average_document_length,
            document_length_by_id: self.document_length_by_id.clone(),
            k1: self.k1,
            b: self.b,
        };
        // Serialization of a plain map/number struct cannot fail.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Restore an index from [`serialize`](Self::serialize) output.
    ///
    /// Malformed blobs fail with a clear error; the caller decides
    /// whether to fall back to an empty index.
    pub fn deserialize(blob: &str) -> Result<Self> {
        let wire: SerializedIndex =
            serde_json::from_str(blob).context("malformed BM25 index blob")?;
        Ok(Self {
            term_document_frequency: wire.term_document_frequency,
            total_document_count: wire.total_document_count,
            average_document_length: wire.average_document_length,
            document_length_by_id: wire.document_length_by_id,
            k1: wire.k1,
            b: wire.b,
        })
    }

    /// Reset to the empty state, keeping the configured parameters.
    pub fn clear(&mut self) {
        self.term_document_frequency.clear();
        self.document_length_by_id.clear();
        self.total_document_count = 0;
        self.average_document_length = 0.0;
    }

    pub fn stats(&self) -> Bm25Stats {
        Bm25Stats {
            total_docs: self.total_document_count,
            vocabulary_size: self.term_document_frequency.len(),
            avg_doc_length: self.average_document_length,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.document_length_by_id.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.total_document_count == 0
    }

    fn recompute_average_length(&mut self) {
        if self.document_length_by_id.is_empty() {
            self.average_document_length = 0.0;
        } else {
            let total: usize = self.document_length_by_id.values().sum();
            self.average_document_length = total as f64 / self.document_length_by_id.len() as f64;
        }
    }

    /// Stopword-filtered, deduplicated query terms in first-seen order.
    fn query_terms(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        tokenize(query)
            .into_iter()
            .filter(|t| !is_stopword(t))
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    fn score_candidate(&self, candidate: &Candidate, query_terms: &[String]) -> f64 {
        let doc_tokens = tokenize(&candidate.text);

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for token in &doc_tokens {
            *tf.entry(token.as_str()).or_insert(0) += 1;
        }

        // Use the length recorded at index time when available; fall back
        // to the candidate's own token count for unindexed text.
        let doc_length = self
            .document_length_by_id
            .get(&candidate.id)
            .copied()
            .unwrap_or(doc_tokens.len()) as f64;

        let length_ratio = if self.average_document_length > 0.0 {
            doc_length / self.average_document_length
        } else {
            1.0
        };

        let mut score = 0.0;
        for term in query_terms {
            let term_freq = tf.get(term.as_str()).copied().unwrap_or(0) as f64;
            if term_freq == 0.0 {
                continue;
            }

            let idf = self.idf(term);
            let numerator = term_freq * (self.k1 + 1.0);
            let denominator = term_freq + self.k1 * (1.0 - self.b + self.b * length_ratio);
            score += idf * numerator / denominator;
        }

        score
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.total_document_count as f64;
        let df = self
            .term_document_frequency
            .get(term)
            .copied()
            .unwrap_or(0) as f64;

        if n == 0.0 || df == 0.0 {
            return 0.0;
        }

        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// Unique non-stopword terms from a token sequence.
fn unique_terms(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .filter(|t| !is_stopword(t))
        .filter(|t| seen.insert((*t).clone()))
        .cloned()
        .collect()
}
