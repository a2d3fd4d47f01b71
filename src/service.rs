//! Search service orchestration.
//!
//! [`SearchService`] owns one user's in-memory document manifest and
//! BM25 index, lazily restored from the blob store on first use. It
//! coordinates the full lifecycle: chunking and indexing documents,
//! superseding re-indexed entries, combined conversation + project +
//! document search, space-scoped RAG retrieval, and cascading removal.
//!
//! Persistence is best-effort caching: save/load failures are logged and
//! swallowed, and a missing or corrupt blob resets to an empty (or
//! rebuilt) index. The in-memory state stays authoritative for the
//! session; no operation here fails past its own boundary except the
//! explicit no-content indexing error.
//!
//! [`SearchRegistry`] holds per-user instances. It is a plain owned
//! struct — the session context owns it and evicts users explicitly.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use log::{debug, warn};

use crate::bm25::{Bm25Index, Candidate};
use crate::chunker::{chunk_document, merge_chunk_results, ScoredDocument};
use crate::models::{
    Document, IndexReport, ProjectInfo, RagDocument, Role, SearchResult, SearchState,
    ServiceStatus, Space,
};
use crate::store::{BlobStore, BM25_INDEX_BLOB, MANIFEST_BLOB};
use crate::worker::{sanitize_worker_query, WorkerHandle};

/// Characters of context on each side of a matched term in snippets.
const SNIPPET_RADIUS: usize = 80;
/// Documents considered per combined-search call.
const SEARCH_DOC_LIMIT: usize = 50;
/// Minimum BM25 score for a document to appear in combined search.
const SEARCH_MIN_SCORE: f64 = 0.1;
/// Extra candidates requested before chunk merging in RAG retrieval.
const RAG_CANDIDATE_MULTIPLIER: usize = 3;
/// Default character budget for assembled RAG context.
pub const DEFAULT_RAG_CONTEXT_CHARS: usize = 100_000;
/// Wrapper/header overhead reserved when filling the context budget.
const CONTEXT_OVERHEAD_CHARS: usize = 50;

/// Per-user search engine instance. See the module docs.
pub struct SearchService<S: BlobStore> {
    user_id: String,
    store: S,
    documents: Vec<Document>,
    index: Bm25Index,
    manifest_loaded: bool,
    worker: Option<WorkerHandle>,
}

impl<S: BlobStore> SearchService<S> {
    pub fn new(user_id: impl Into<String>, store: S) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            documents: Vec::new(),
            index: Bm25Index::new(),
            manifest_loaded: false,
            worker: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Attach a conversation full-text worker. Combined search delegates
    /// conversation matching to it until it errors or times out.
    pub fn attach_worker(&mut self, worker: WorkerHandle) {
        self.worker = Some(worker);
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Index documents, superseding any prior entries with the same ids.
    ///
    /// Documents over the chunking threshold are split first; previously
    /// indexed entries (including whole chunk sets) for the incoming ids
    /// are removed from the BM25 index and the manifest before the new
    /// entries are added. Both blobs are persisted best-effort.
    ///
    /// Fails only when no document has content.
    pub async fn index_documents(&mut self, documents: Vec<Document>) -> Result<IndexReport> {
        self.ensure_manifest_loaded().await;

        let with_content: Vec<Document> = documents
            .into_iter()
            .filter(|d| !d.content.is_empty())
            .collect();
        if with_content.is_empty() {
            bail!("no content to index");
        }

        let mut processed: Vec<Document> = Vec::new();
        for doc in &with_content {
            processed.extend(chunk_document(doc));
        }

        let incoming: HashSet<&str> = with_content.iter().map(|d| d.id.as_str()).collect();

        // Remove-then-add: superseded entries leave the index using the
        // exact text they were indexed with.
        let mut remaining = Vec::with_capacity(self.documents.len());
        for existing in self.documents.drain(..) {
            let superseded = incoming.contains(existing.parent_or_self_id())
                || incoming.contains(existing.id.as_str());
            if superseded {
                self.index
                    .remove_document(&existing.id, &searchable_text(&existing));
            } else {
                remaining.push(existing);
            }
        }

        for doc in &processed {
            self.index.add_document(&doc.id, &searchable_text(doc));
        }

        let report = IndexReport {
            documents: with_content.len(),
            entries: processed.len(),
        };

        remaining.extend(processed);
        self.documents = remaining;

        self.persist_manifest().await;
        self.persist_index().await;

        debug!(
            "indexed {} documents as {} entries for user {}",
            report.documents, report.entries, self.user_id
        );
        Ok(report)
    }

    /// Combined search over conversations, projects, messages, and
    /// indexed documents.
    ///
    /// Conversation matching prefers the full-text worker and falls back
    /// to substring matching on titles; message bodies and project
    /// name/description are substring-matched. Document hits are ranked
    /// by BM25 with a snippet around the best-matching term. Results
    /// with a relevance score sort first (descending), the rest by
    /// recency.
    pub async fn search(&mut self, query: &str, state: &SearchState) -> Vec<SearchResult> {
        self.ensure_manifest_loaded().await;

        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<SearchResult> = Vec::new();
        let mut found_conversations: HashSet<String> = HashSet::new();

        for hit in self.search_conversations_with_worker(&normalized).await {
            if let Some(conversation) = state.conversations.get(&hit) {
                found_conversations.insert(conversation.id.clone());
                results.push(SearchResult::Conversation {
                    conversation_id: conversation.id.clone(),
                    title: conversation
                        .title
                        .clone()
                        .unwrap_or_else(|| "Untitled".to_string()),
                    timestamp: conversation.created_at,
                    project: project_info(conversation.space_id.as_deref(), &state.spaces),
                });
            }
        }

        for conversation in state.conversations.values() {
            if found_conversations.contains(&conversation.id) {
                continue;
            }
            let title = conversation.title.as_deref().unwrap_or("").to_lowercase();
            if title.contains(&normalized) {
                results.push(SearchResult::Conversation {
                    conversation_id: conversation.id.clone(),
                    title: conversation
                        .title
                        .clone()
                        .unwrap_or_else(|| "Untitled".to_string()),
                    timestamp: conversation.created_at,
                    project: project_info(conversation.space_id.as_deref(), &state.spaces),
                });
            }
        }

        for space in state.spaces.values() {
            if !space.is_project {
                continue;
            }
            let name = space.project_name.as_deref().unwrap_or("").to_lowercase();
            let description = space
                .project_instructions
                .as_deref()
                .unwrap_or("")
                .to_lowercase();
            if name.contains(&normalized) || description.contains(&normalized) {
                results.push(SearchResult::Project {
                    project_id: space.id.clone(),
                    name: space
                        .project_name
                        .clone()
                        .unwrap_or_else(|| "Untitled Project".to_string()),
                    icon: space.project_icon.clone(),
                    description: space.project_instructions.clone(),
                    timestamp: space.created_at,
                });
            }
        }

        for message in state.messages.values() {
            if !matches!(message.role, Role::User | Role::Assistant) {
                continue;
            }
            if message.content.to_lowercase().contains(&normalized) {
                let Some(conversation) = state.conversations.get(&message.conversation_id) else {
                    continue;
                };
                results.push(SearchResult::Message {
                    conversation_id: message.conversation_id.clone(),
                    message_id: message.id.clone(),
                    conversation_title: conversation
                        .title
                        .clone()
                        .unwrap_or_else(|| "Untitled".to_string()),
                    preview: message.content.chars().take(100).collect(),
                    timestamp: message.created_at,
                    project: project_info(conversation.space_id.as_deref(), &state.spaces),
                });
            }
        }

        let mut deduplicated = dedupe_results(results);

        // BM25-ranked document hits with a context snippet.
        let candidates: Vec<(Candidate, &Document)> = self
            .documents
            .iter()
            .filter(|d| !d.content.is_empty())
            .map(|d| {
                (
                    Candidate {
                        id: d.id.clone(),
                        text: searchable_text(d),
                    },
                    d,
                )
            })
            .collect();

        if !candidates.is_empty() {
            let candidate_list: Vec<Candidate> =
                candidates.iter().map(|(c, _)| c.clone()).collect();
            let ranked = self.index.rank_documents(
                query,
                &candidate_list,
                Some(SEARCH_DOC_LIMIT),
                SEARCH_MIN_SCORE,
            );

            for r in ranked {
                let doc = candidates[r.index].1;
                deduplicated.push(SearchResult::Document {
                    document_id: doc.id.clone(),
                    name: doc.name.clone(),
                    folder_path: doc.folder_path.clone(),
                    match_context: self.extract_match_context(query, &doc.content),
                    timestamp: doc.modified_time,
                    score: r.score,
                });
            }
        }

        deduplicated.sort_by(|a, b| match (a.score(), b.score()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.timestamp().cmp(&a.timestamp()),
        });

        deduplicated
    }

    /// All conversations as results, newest first.
    pub fn get_all_conversations(&self, state: &SearchState) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = state
            .conversations
            .values()
            .map(|c| SearchResult::Conversation {
                conversation_id: c.id.clone(),
                title: c.title.clone().unwrap_or_else(|| "Untitled".to_string()),
                timestamp: c.created_at,
                project: project_info(c.space_id.as_deref(), &state.spaces),
            })
            .collect();
        results.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        results
    }

    /// Retrieve the documents most relevant to a query within one space.
    ///
    /// Ranks `3 × top_k` chunk-level candidates, merges chunks to the
    /// best-scoring entry per parent document, and returns up to `top_k`
    /// parent-level results carrying the winning chunk's content.
    /// Documents from other spaces are never returned.
    pub async fn retrieve_for_rag(
        &mut self,
        query: &str,
        space_id: &str,
        top_k: usize,
        min_score: f64,
    ) -> Vec<RagDocument> {
        self.ensure_manifest_loaded().await;

        let space_docs: Vec<&Document> = self
            .documents
            .iter()
            .filter(|d| d.space_id.as_deref() == Some(space_id) && !d.content.is_empty())
            .collect();

        if space_docs.is_empty() {
            return Vec::new();
        }

        let effective_top_k = (top_k * RAG_CANDIDATE_MULTIPLIER).min(space_docs.len());
        let candidates: Vec<Candidate> = space_docs
            .iter()
            .map(|d| Candidate {
                id: d.id.clone(),
                text: searchable_text(d),
            })
            .collect();

        let ranked = self
            .index
            .rank_documents(query, &candidates, Some(effective_top_k), min_score);

        let scored: Vec<ScoredDocument> = ranked
            .into_iter()
            .map(|r| ScoredDocument {
                document: space_docs[r.index].clone(),
                score: r.score,
            })
            .collect();

        let mut merged = merge_chunk_results(scored);
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(top_k);

        merged
            .into_iter()
            .map(|item| RagDocument {
                id: item.document.parent_or_self_id().to_string(),
                name: item.document.name.clone(),
                score: item.score,
                is_chunk: item.document.is_chunk,
                chunk_index: item.document.chunk_index,
                total_chunks: item.document.total_chunks,
                chunk_title: item.document.chunk_title.clone(),
                content: item.document.content,
            })
            .collect()
    }

    /// Remove one document (and its chunk set, if any). Returns the
    /// number of manifest entries removed.
    pub async fn remove_document(&mut self, document_id: &str) -> usize {
        self.remove_matching(|d| {
            d.id == document_id || d.parent_or_self_id() == document_id
        })
        .await
    }

    /// Remove all documents in a folder (chunks inherit the folder).
    pub async fn remove_documents_by_folder(&mut self, folder_id: &str) -> usize {
        self.remove_matching(|d| d.folder_id == folder_id).await
    }

    /// Remove all documents scoped to a space.
    pub async fn remove_documents_by_space(&mut self, space_id: &str) -> usize {
        self.remove_matching(|d| d.space_id.as_deref() == Some(space_id))
            .await
    }

    /// Resolve a document by id. If the id belongs to a chunked parent,
    /// a virtual combined document is synthesized from its chunks in
    /// order.
    pub async fn get_document_by_id(&mut self, document_id: &str) -> Option<Document> {
        self.ensure_manifest_loaded().await;

        if let Some(doc) = self.documents.iter().find(|d| d.id == document_id) {
            return Some(doc.clone());
        }

        let chunks: Vec<&Document> = self
            .documents
            .iter()
            .filter(|d| d.parent_document_id.as_deref() == Some(document_id))
            .collect();
        combine_chunks(document_id, chunks)
    }

    /// Resolve a document by name, synthesizing a combined document for
    /// chunked parents. Falls back to a case-insensitive match.
    pub async fn get_document_by_name(&mut self, name: &str) -> Option<Document> {
        self.ensure_manifest_loaded().await;

        if let Some(doc) = self
            .documents
            .iter()
            .find(|d| d.name == name && !d.is_chunk)
        {
            return Some(doc.clone());
        }

        let chunks: Vec<&Document> = self
            .documents
            .iter()
            .filter(|d| d.name == name && d.is_chunk)
            .collect();
        if let Some(first) = chunks.first() {
            let parent_id = first.parent_or_self_id().to_string();
            if let Some(combined) = combine_chunks(&parent_id, chunks) {
                return Some(combined);
            }
        }

        let lower = name.to_lowercase();
        self.documents
            .iter()
            .find(|d| d.name.to_lowercase() == lower && !d.is_chunk)
            .cloned()
    }

    /// All manifest entries, chunks included.
    pub async fn get_documents(&mut self) -> &[Document] {
        self.ensure_manifest_loaded().await;
        &self.documents
    }

    pub async fn has_document(&mut self, document_id: &str) -> bool {
        self.ensure_manifest_loaded().await;
        self.documents.iter().any(|d| d.id == document_id)
    }

    /// Distinct space ids referenced by manifest entries.
    pub async fn referenced_space_ids(&mut self) -> HashSet<String> {
        self.ensure_manifest_loaded().await;
        self.documents
            .iter()
            .filter_map(|d| d.space_id.clone())
            .collect()
    }

    /// Entries referencing spaces outside `valid_space_ids`, grouped by
    /// space with unique parent-document ids.
    pub async fn orphaned_documents(&mut self, valid_space_ids: &HashSet<String>) -> OrphanReport {
        self.ensure_manifest_loaded().await;

        let mut by_space: HashMap<String, HashSet<String>> = HashMap::new();
        let mut entries = 0usize;

        for doc in &self.documents {
            let Some(space_id) = doc.space_id.as_deref() else {
                continue;
            };
            if valid_space_ids.contains(space_id) {
                continue;
            }
            entries += 1;
            by_space
                .entry(space_id.to_string())
                .or_default()
                .insert(doc.parent_or_self_id().to_string());
        }

        let mut documents = 0usize;
        let by_space: HashMap<String, Vec<String>> = by_space
            .into_iter()
            .map(|(space, ids)| {
                documents += ids.len();
                (space, ids.into_iter().collect())
            })
            .collect();

        OrphanReport {
            by_space,
            documents,
            entries,
        }
    }

    /// Remove every orphaned document and persist. Returns the space ids
    /// that had documents removed.
    pub async fn cleanup_orphaned_documents(
        &mut self,
        valid_space_ids: &HashSet<String>,
    ) -> Vec<String> {
        let orphaned = self.orphaned_documents(valid_space_ids).await;
        let space_ids: Vec<String> = orphaned.by_space.keys().cloned().collect();

        if space_ids.is_empty() {
            return Vec::new();
        }

        debug!(
            "cleaning up {} orphaned documents ({} entries) across {} spaces",
            orphaned.documents,
            orphaned.entries,
            space_ids.len()
        );
        for space_id in &space_ids {
            self.remove_documents_by_space(space_id).await;
        }
        space_ids
    }

    /// Drop all in-memory state and delete both persisted blobs.
    pub async fn clear(&mut self) {
        self.documents.clear();
        self.index.clear();
        self.manifest_loaded = false;

        for key in [MANIFEST_BLOB, BM25_INDEX_BLOB] {
            if let Err(err) = self.store.remove_blob(key).await {
                warn!("failed to remove blob {key}: {err:#}");
            }
        }
    }

    pub async fn status(&mut self) -> ServiceStatus {
        self.ensure_manifest_loaded().await;

        let chunks = self.documents.iter().filter(|d| d.is_chunk).count();
        let non_chunks = self.documents.len() - chunks;
        let unique_parents: HashSet<&str> = self
            .documents
            .iter()
            .filter(|d| d.is_chunk)
            .map(|d| d.parent_or_self_id())
            .collect();
        let total_content_bytes = self
            .documents
            .iter()
            .map(|d| d.content.len() as u64)
            .sum();

        ServiceStatus {
            documents: self.documents.len(),
            unique_documents: non_chunks + unique_parents.len(),
            chunks,
            total_content_bytes,
            bm25: self.index.stats(),
        }
    }

    // ---- internal ----

    /// Load the manifest and index once. `&mut self` serializes callers,
    /// so concurrent first uses cannot double-load.
    async fn ensure_manifest_loaded(&mut self) {
        if self.manifest_loaded {
            return;
        }
        self.manifest_loaded = true;
        self.load_manifest().await;
        self.load_index().await;
    }

    async fn load_manifest(&mut self) {
        let blob = match self.store.load_blob(MANIFEST_BLOB).await {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to load document manifest: {err:#}");
                None
            }
        };

        let Some(json) = blob else {
            self.documents = Vec::new();
            self.index = Bm25Index::new();
            return;
        };

        match serde_json::from_str::<Vec<Document>>(&json) {
            Ok(mut docs) => {
                for doc in &mut docs {
                    if doc.size == 0 && !doc.content.is_empty() {
                        doc.size = doc.content.len() as u64;
                    }
                }
                self.documents = docs;
            }
            Err(err) => {
                warn!("malformed document manifest, resetting: {err:#}");
                self.documents = Vec::new();
                self.index = Bm25Index::new();
            }
        }
    }

    async fn load_index(&mut self) {
        let blob = match self.store.load_blob(BM25_INDEX_BLOB).await {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to load BM25 index blob: {err:#}");
                None
            }
        };

        match blob {
            Some(serialized) => match Bm25Index::deserialize(&serialized) {
                Ok(index) => {
                    self.index = index;
                    debug!(
                        "loaded BM25 index for user {}: {:?}",
                        self.user_id,
                        self.index.stats()
                    );
                }
                Err(err) => {
                    warn!("failed to deserialize BM25 index, rebuilding: {err:#}");
                    self.rebuild_index();
                }
            },
            None => self.rebuild_index(),
        }
    }

    /// Re-derive BM25 statistics from the in-memory document list.
    fn rebuild_index(&mut self) {
        self.index = Bm25Index::new();
        for doc in &self.documents {
            if !doc.content.is_empty() {
                self.index.add_document(&doc.id, &searchable_text(doc));
            }
        }
    }

    async fn persist_manifest(&self) {
        let json = match serde_json::to_string(&self.documents) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize document manifest: {err:#}");
                return;
            }
        };
        if let Err(err) = self.store.save_blob(MANIFEST_BLOB, &json).await {
            warn!("failed to persist document manifest: {err:#}");
        }
    }

    async fn persist_index(&self) {
        let serialized = self.index.serialize();
        if let Err(err) = self.store.save_blob(BM25_INDEX_BLOB, &serialized).await {
            warn!("failed to persist BM25 index: {err:#}");
        }
    }

    async fn remove_matching<F: Fn(&Document) -> bool>(&mut self, matches: F) -> usize {
        self.ensure_manifest_loaded().await;

        let mut removed = 0usize;
        let mut remaining = Vec::with_capacity(self.documents.len());
        for doc in self.documents.drain(..) {
            if matches(&doc) {
                self.index.remove_document(&doc.id, &searchable_text(&doc));
                removed += 1;
            } else {
                remaining.push(doc);
            }
        }
        self.documents = remaining;

        if removed > 0 {
            self.persist_manifest().await;
            self.persist_index().await;
        }
        removed
    }

    /// Worker-backed conversation search; a failure poisons the handle
    /// so subsequent calls take the substring path.
    async fn search_conversations_with_worker(&mut self, query: &str) -> Vec<String> {
        let Some(worker) = &self.worker else {
            return Vec::new();
        };

        let sanitized = sanitize_worker_query(query);
        if sanitized.is_empty() {
            return Vec::new();
        }

        match worker.search(&sanitized).await {
            Ok(hits) => hits.into_iter().map(|h| h.conversation_id).collect(),
            Err(err) => {
                warn!("worker search failed, falling back to substring: {err:#}");
                self.worker = None;
                Vec::new()
            }
        }
    }

    /// Snippet of ±[`SNIPPET_RADIUS`] characters around the first
    /// occurrence of the earliest-matching query term.
    fn extract_match_context(&self, query: &str, content: &str) -> Option<String> {
        let terms = self.index.get_matching_terms(query);
        if terms.is_empty() || content.is_empty() {
            return None;
        }

        let lower = content.to_lowercase();
        let mut best: Option<usize> = None;
        for term in &terms {
            if let Some(idx) = lower.find(term.as_str()) {
                best = Some(best.map_or(idx, |b| b.min(idx)));
            }
        }
        let best = best?.min(content.len());

        let mut start = best.saturating_sub(SNIPPET_RADIUS);
        while start < content.len() && !content.is_char_boundary(start) {
            start += 1;
        }
        let mut end = (best + SNIPPET_RADIUS).min(content.len());
        while end > start && !content.is_char_boundary(end) {
            end -= 1;
        }
        if start >= end {
            return None;
        }

        let mut snippet = content[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
        if start > 0 {
            snippet = format!("…{snippet}");
        }
        if end < content.len() {
            snippet = format!("{snippet}…");
        }
        Some(snippet)
    }
}

/// Orphaned-document diagnostics, grouped by unknown space id.
#[derive(Debug, Clone, Default)]
pub struct OrphanReport {
    /// Space id → unique parent-document ids referencing it.
    pub by_space: HashMap<String, Vec<String>>,
    /// Unique parent documents across all orphaned spaces.
    pub documents: usize,
    /// Raw manifest entries (chunks counted individually).
    pub entries: usize,
}

/// The text a document is indexed and matched under: name, chunk title
/// (when present), folder path, and content.
pub fn searchable_text(doc: &Document) -> String {
    let chunk_context = doc
        .chunk_title
        .as_deref()
        .map(|t| format!(" [{t}]"))
        .unwrap_or_default();
    format!(
        "{}{} {} {}",
        doc.name, chunk_context, doc.folder_path, doc.content
    )
}

/// Concatenate `--- Document: {name} ---` blocks, in input order, until
/// the next block would exceed the character budget. Blocks are never
/// truncated mid-way: a first document too large for the whole budget
/// yields an empty string.
pub fn format_rag_context(documents: &[RagDocument], max_context_chars: usize) -> String {
    if documents.is_empty() {
        return String::new();
    }

    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;

    for doc in documents {
        let block = format!("--- Document: {} ---\n{}", doc.name, doc.content);
        let new_total = total + block.len() + 4;
        if new_total + CONTEXT_OVERHEAD_CHARS > max_context_chars {
            break;
        }
        parts.push(block);
        total = new_total;
    }

    if parts.is_empty() {
        return String::new();
    }

    format!(
        "[Relevant project documents for context:\n\n{}\n]",
        parts.join("\n\n")
    )
}

/// Keep one result per conversation, preferring conversation-level hits
/// over message-level ones; projects pass through.
fn dedupe_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen_conversations: HashSet<String> = HashSet::new();
    let mut deduplicated: Vec<SearchResult> = Vec::new();

    for result in &results {
        if let SearchResult::Conversation {
            conversation_id, ..
        } = result
        {
            if seen_conversations.insert(conversation_id.clone()) {
                deduplicated.push(result.clone());
            }
        }
    }

    for result in results {
        match &result {
            SearchResult::Message {
                conversation_id, ..
            } => {
                if !seen_conversations.contains(conversation_id) {
                    deduplicated.push(result);
                }
            }
            SearchResult::Project { .. } => deduplicated.push(result),
            _ => {}
        }
    }

    deduplicated
}

fn project_info(space_id: Option<&str>, spaces: &HashMap<String, Space>) -> Option<ProjectInfo> {
    let space = spaces.get(space_id?)?;
    if !space.is_project {
        return None;
    }
    Some(ProjectInfo {
        name: space.project_name.clone(),
        icon: space.project_icon.clone(),
    })
}

/// Synthesize a virtual combined document from a parent's chunks.
fn combine_chunks(parent_id: &str, mut chunks: Vec<&Document>) -> Option<Document> {
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|d| d.chunk_index.unwrap_or(0));

    let content = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut combined = chunks[0].clone();
    combined.id = parent_id.to_string();
    combined.size = content.len() as u64;
    combined.content = content;
    combined.is_chunk = false;
    combined.parent_document_id = None;
    combined.chunk_index = None;
    combined.total_chunks = None;
    combined.chunk_title = None;
    combined.content_hash = None;
    Some(combined)
}

/// Owned per-user instance cache with explicit eviction.
///
/// The session context owns the registry; instances are created on
/// demand with the supplied store factory and live until evicted.
pub struct SearchRegistry<S: BlobStore, F: Fn(&str) -> S> {
    make_store: F,
    instances: HashMap<String, SearchService<S>>,
}

impl<S: BlobStore, F: Fn(&str) -> S> SearchRegistry<S, F> {
    pub fn new(make_store: F) -> Self {
        Self {
            make_store,
            instances: HashMap::new(),
        }
    }

    /// The instance for `user_id`, created on first access.
    pub fn get_or_create(&mut self, user_id: &str) -> &mut SearchService<S> {
        self.instances.entry(user_id.to_string()).or_insert_with(|| {
            SearchService::new(user_id, (self.make_store)(user_id))
        })
    }

    /// Tear down a user's instance. Returns true if one existed.
    pub fn evict(&mut self, user_id: &str) -> bool {
        self.instances.remove(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
