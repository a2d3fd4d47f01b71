//! Background conversation full-text worker.
//!
//! An optional worker task owns an inverted index over conversation
//! titles and message bodies, answering search requests over a message
//! channel. Requests carry a correlation id and a hard deadline: a
//! timeout, a closed channel, or a worker-side error poisons the handle,
//! and the service falls back to local substring search. No search path
//! ever blocks the caller indefinitely.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use crate::tokenize::{filter_stopwords, tokenize};

/// Default per-request deadline.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

/// A conversation matched by the worker, with its term-match score.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHit {
    pub score: f64,
    pub conversation_id: String,
}

enum WorkerRequest {
    Populate {
        id: Uuid,
        /// (conversation id, searchable text) pairs.
        entries: Vec<(String, String)>,
        reply: oneshot::Sender<()>,
    },
    Search {
        id: Uuid,
        query: String,
        reply: oneshot::Sender<Vec<ConversationHit>>,
    },
}

/// Handle to the spawned worker task.
///
/// Cheap to drop: the task exits when the channel closes.
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
    deadline: Duration,
}

impl WorkerHandle {
    /// Spawn a worker task with the default request deadline.
    pub fn spawn() -> Self {
        Self::spawn_with_deadline(DEFAULT_DEADLINE)
    }

    pub fn spawn_with_deadline(deadline: Duration) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run_worker(rx));
        Self { tx, deadline }
    }

    /// Replace the worker's index with the given conversation entries.
    pub async fn populate(&self, entries: Vec<(String, String)>) -> Result<()> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            WorkerRequest::Populate {
                id,
                entries,
                reply: reply_tx,
            },
            reply_rx,
            id,
        )
        .await
    }

    /// Search the worker's index. Results are sorted by descending score.
    pub async fn search(&self, query: &str) -> Result<Vec<ConversationHit>> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(
            WorkerRequest::Search {
                id,
                query: query.to_string(),
                reply: reply_tx,
            },
            reply_rx,
            id,
        )
        .await
    }

    async fn request<T>(
        &self,
        req: WorkerRequest,
        reply: oneshot::Receiver<T>,
        id: Uuid,
    ) -> Result<T> {
        self.tx
            .send(req)
            .await
            .map_err(|_| anyhow!("search worker channel closed (request {id})"))?;

        match timeout(self.deadline, reply).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(anyhow!("search worker dropped request {id}")),
            Err(_) => {
                warn!("search worker request {id} timed out after {:?}", self.deadline);
                Err(anyhow!("search worker request {id} timed out"))
            }
        }
    }
}

/// Worker loop: owns the inverted index, processes requests in order.
async fn run_worker(mut rx: mpsc::Receiver<WorkerRequest>) {
    // term -> conversation id -> occurrence count
    let mut index: HashMap<String, HashMap<String, usize>> = HashMap::new();

    while let Some(req) = rx.recv().await {
        match req {
            WorkerRequest::Populate { id, entries, reply } => {
                index.clear();
                for (conversation_id, text) in entries {
                    for term in filter_stopwords(&tokenize(&text)) {
                        *index
                            .entry(term)
                            .or_default()
                            .entry(conversation_id.clone())
                            .or_insert(0) += 1;
                    }
                }
                debug!("worker populate {id}: {} terms indexed", index.len());
                let _ = reply.send(());
            }
            WorkerRequest::Search { id, query, reply } => {
                let hits = search_index(&index, &query);
                debug!("worker search {id}: {} hits", hits.len());
                let _ = reply.send(hits);
            }
        }
    }
}

fn search_index(
    index: &HashMap<String, HashMap<String, usize>>,
    query: &str,
) -> Vec<ConversationHit> {
    let terms = filter_stopwords(&tokenize(query));
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for term in &terms {
        if let Some(postings) = index.get(term) {
            for (conversation_id, count) in postings {
                *scores.entry(conversation_id.as_str()).or_insert(0.0) += *count as f64;
            }
        }
    }

    let mut hits: Vec<ConversationHit> = scores
        .into_iter()
        .map(|(conversation_id, score)| ConversationHit {
            score,
            conversation_id: conversation_id.to_string(),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    hits
}

/// Strip trailing boolean operators that full-text engines would treat
/// as incomplete expressions (`"scala and"` → `"scala"`). Returns an
/// empty string when the whole query was an operator.
pub fn sanitize_worker_query(query: &str) -> String {
    let mut sanitized = query.trim();
    while let Some(last) = sanitized.split_whitespace().last() {
        let is_operator = ["and", "or", "not"]
            .iter()
            .any(|op| last.eq_ignore_ascii_case(op));
        if !is_operator {
            break;
        }
        sanitized = sanitized[..sanitized.len() - last.len()].trim_end();
    }
    sanitized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_populate_and_search() {
        let worker = WorkerHandle::spawn();
        worker
            .populate(vec![
                ("c1".to_string(), "rust memory safety discussion".to_string()),
                ("c2".to_string(), "python packaging woes".to_string()),
            ])
            .await
            .unwrap();

        let hits = worker.search("rust").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].conversation_id, "c1");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_repeated_terms_score_higher() {
        let worker = WorkerHandle::spawn();
        worker
            .populate(vec![
                ("c1".to_string(), "docker docker docker".to_string()),
                ("c2".to_string(), "docker once".to_string()),
            ])
            .await
            .unwrap();

        let hits = worker.search("docker").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].conversation_id, "c1");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let worker = WorkerHandle::spawn();
        worker
            .populate(vec![("c1".to_string(), "anything at all".to_string())])
            .await
            .unwrap();
        assert!(worker.search("the").await.unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_strips_trailing_operators() {
        assert_eq!(sanitize_worker_query("scala and"), "scala");
        assert_eq!(sanitize_worker_query("scala AND"), "scala");
        assert_eq!(sanitize_worker_query("kafka or not"), "kafka");
        assert_eq!(sanitize_worker_query("and"), "");
        assert_eq!(sanitize_worker_query("plain query"), "plain query");
        // Operators embedded in words survive.
        assert_eq!(sanitize_worker_query("command"), "command");
    }
}
