//! Core data types flowing through the indexing and retrieval pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bm25::Bm25Stats;

/// A unit of indexable content.
///
/// Oversized documents are split by the chunker; each chunk is itself a
/// `Document` with the chunk fields populated and an id of the form
/// `{parent_id}__chunk_{n}`. The serialized manifest is a JSON array of
/// these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub content: String,
    pub mime_type: String,
    /// Content size in bytes.
    pub size: u64,
    /// Unix timestamp of the last modification.
    pub modified_time: i64,
    pub folder_id: String,
    pub folder_path: String,
    /// Namespace for RAG scoping, when the document belongs to a space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default)]
    pub is_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_document_id: Option<String>,
    /// 0-based position among the parent's chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    /// Total chunk count, back-filled once all chunks are produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    /// Best-effort heading extracted from the chunk content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_title: Option<String>,
    /// SHA-256 of the source document's content, for change detection.
    /// Chunks carry the parent's full-content hash, not a hash of the
    /// chunk text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Document {
    /// The owning document's id: the parent for chunks, itself otherwise.
    pub fn parent_or_self_id(&self) -> &str {
        self.parent_document_id.as_deref().unwrap_or(&self.id)
    }
}

/// Conversation metadata searched alongside documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub space_id: Option<String>,
    pub created_at: i64,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// A space: the namespace documents and conversations can belong to.
///
/// Spaces marked as projects carry display metadata and are themselves
/// searchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Space {
    pub id: String,
    #[serde(default)]
    pub is_project: bool,
    pub project_name: Option<String>,
    pub project_icon: Option<String>,
    pub project_instructions: Option<String>,
    pub created_at: i64,
}

/// Snapshot of conversations, messages, and spaces handed to a search
/// call by the hosting application.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub conversations: HashMap<String, Conversation>,
    pub messages: HashMap<String, Message>,
    pub spaces: HashMap<String, Space>,
}

/// Project display info attached to conversation/message results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectInfo {
    pub name: Option<String>,
    pub icon: Option<String>,
}

/// One search hit. Each variant carries only the fields relevant to its
/// kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchResult {
    Conversation {
        conversation_id: String,
        title: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<ProjectInfo>,
    },
    Message {
        conversation_id: String,
        message_id: String,
        conversation_title: String,
        preview: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<ProjectInfo>,
    },
    Project {
        project_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        timestamp: i64,
    },
    Document {
        document_id: String,
        name: String,
        folder_path: String,
        /// Snippet around the best-matching query term.
        #[serde(skip_serializing_if = "Option::is_none")]
        match_context: Option<String>,
        timestamp: i64,
        score: f64,
    },
}

impl SearchResult {
    pub fn timestamp(&self) -> i64 {
        match self {
            SearchResult::Conversation { timestamp, .. }
            | SearchResult::Message { timestamp, .. }
            | SearchResult::Project { timestamp, .. }
            | SearchResult::Document { timestamp, .. } => *timestamp,
        }
    }

    /// Relevance score, present only on document hits.
    pub fn score(&self) -> Option<f64> {
        match self {
            SearchResult::Document { score, .. } => Some(*score),
            _ => None,
        }
    }
}

/// A document retrieved for RAG context assembly.
///
/// For chunked parents, `content` is the winning chunk's text, not the
/// reassembled document — the most relevant fragment is what goes into
/// the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct RagDocument {
    /// Parent document id (never a chunk id).
    pub id: String,
    pub name: String,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_chunk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_title: Option<String>,
}

/// Counters reported by `SearchService::status`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Manifest entries (chunks count individually).
    pub documents: usize,
    /// Unique source documents (chunk sets count once).
    pub unique_documents: usize,
    /// Chunk entries only.
    pub chunks: usize,
    /// Total content bytes across manifest entries.
    pub total_content_bytes: u64,
    pub bm25: Bm25Stats,
}

/// Summary returned by a successful `index_documents` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Source documents accepted for indexing.
    pub documents: usize,
    /// Manifest entries written (chunks count individually).
    pub entries: usize,
}
