//! End-to-end tests of the search service over the in-memory blob store:
//! indexing, chunked documents, superseding, space-scoped retrieval,
//! context formatting, persistence, and recovery from bad blobs.

use std::sync::Arc;

use quarry::models::{Conversation, Document, SearchResult, SearchState};
use quarry::service::{format_rag_context, SearchService};
use quarry::store::{BlobStore, MemoryBlobStore, BM25_INDEX_BLOB, MANIFEST_BLOB};
use quarry::worker::WorkerHandle;

fn doc(id: &str, content: &str) -> Document {
    Document {
        id: id.to_string(),
        name: format!("{id}.md"),
        content: content.to_string(),
        mime_type: "text/markdown".to_string(),
        size: content.len() as u64,
        modified_time: 1_700_000_000,
        folder_id: "folder-1".to_string(),
        folder_path: "/docs".to_string(),
        space_id: None,
        is_chunk: false,
        parent_document_id: None,
        chunk_index: None,
        total_chunks: None,
        chunk_title: None,
        content_hash: None,
    }
}

fn space_doc(id: &str, space_id: &str, content: &str) -> Document {
    let mut d = doc(id, content);
    d.space_id = Some(space_id.to_string());
    d
}

/// Content large enough to force chunking, with a unique marker term
/// buried in one section.
fn oversized_content(marker: &str) -> String {
    let mut content = String::new();
    for section in 0..40 {
        content.push_str(&format!("## Section {section}\n\n"));
        if section == 17 {
            content.push_str(marker);
            content.push(' ');
        }
        for word in 0..600 {
            content.push_str(&format!("filler{word} "));
        }
        content.push_str("\n\n");
    }
    content
}

#[tokio::test]
async fn test_index_and_search_small_documents() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    let report = service
        .index_documents(vec![
            doc("alpha", "postgres connection pooling guide"),
            doc("beta", "redis caching strategies overview"),
            doc("gamma", "kafka consumer group rebalancing"),
        ])
        .await
        .unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.entries, 3);

    let results = service.search("postgres pooling", &SearchState::default()).await;
    assert_eq!(results.len(), 1);
    let SearchResult::Document {
        document_id, score, ..
    } = &results[0]
    else {
        panic!("expected a document result");
    };
    assert_eq!(document_id, "alpha");
    assert!(*score > 0.0);
}

#[tokio::test]
async fn test_indexing_rejects_empty_content() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());
    let err = service
        .index_documents(vec![doc("empty", "")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no content"));
}

#[tokio::test]
async fn test_oversized_document_is_chunked_and_searchable() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    let report = service
        .index_documents(vec![doc("big", &oversized_content("zephyrblade"))])
        .await
        .unwrap();
    assert_eq!(report.documents, 1);
    assert!(report.entries > 1, "expected chunked entries");

    // The hit is a chunk of the parent.
    let results = service.search("zephyrblade", &SearchState::default()).await;
    assert!(!results.is_empty());
    let SearchResult::Document { document_id, .. } = &results[0] else {
        panic!("expected a document result");
    };
    assert!(document_id.starts_with("big__chunk_"));

    // The parent id resolves to a reassembled virtual document.
    let combined = service.get_document_by_id("big").await.unwrap();
    assert_eq!(combined.id, "big");
    assert!(!combined.is_chunk);
    assert!(combined.content.contains("zephyrblade"));

    // By name too.
    let by_name = service.get_document_by_name("big.md").await.unwrap();
    assert_eq!(by_name.id, "big");

    let status = service.status().await;
    assert_eq!(status.unique_documents, 1);
    assert_eq!(status.chunks, report.entries);
}

#[tokio::test]
async fn test_reindexing_supersedes_previous_content() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    service
        .index_documents(vec![doc("d1", "ancient mariner ballad")])
        .await
        .unwrap();
    service
        .index_documents(vec![doc("d1", "modern shipping logistics")])
        .await
        .unwrap();

    let old = service.search("mariner", &SearchState::default()).await;
    assert!(old.is_empty(), "superseded content should not match");

    let new = service.search("logistics", &SearchState::default()).await;
    assert_eq!(new.len(), 1);

    let status = service.status().await;
    assert_eq!(status.documents, 1);
    assert_eq!(status.bm25.total_docs, 1);
}

#[tokio::test]
async fn test_reindexing_replaces_whole_chunk_set() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    service
        .index_documents(vec![doc("big", &oversized_content("oldmarker"))])
        .await
        .unwrap();
    let report = service
        .index_documents(vec![doc("big", "now a small document")])
        .await
        .unwrap();
    assert_eq!(report.entries, 1);

    assert!(service
        .search("oldmarker", &SearchState::default())
        .await
        .is_empty());

    let status = service.status().await;
    assert_eq!(status.documents, 1);
    assert_eq!(status.chunks, 0);
    assert_eq!(status.bm25.total_docs, 1);
}

#[tokio::test]
async fn test_rag_retrieval_is_space_scoped() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    service
        .index_documents(vec![
            space_doc("s1-doc", "space-one", "terraform module layout conventions"),
            space_doc("s2-doc", "space-two", "terraform state locking with dynamodb"),
            doc("global", "terraform provider versioning"),
        ])
        .await
        .unwrap();

    let retrieved = service
        .retrieve_for_rag("terraform", "space-one", 5, 0.0)
        .await;
    assert_eq!(retrieved.len(), 1);
    assert_eq!(retrieved[0].id, "s1-doc");

    // Unknown space yields nothing.
    assert!(service
        .retrieve_for_rag("terraform", "space-three", 5, 0.0)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_rag_merges_chunks_to_best_per_parent() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    service
        .index_documents(vec![
            space_doc("big", "s1", &oversized_content("quorumwave")),
            space_doc("small", "s1", "quorumwave consensus notes"),
        ])
        .await
        .unwrap();

    let retrieved = service.retrieve_for_rag("quorumwave", "s1", 5, 0.0).await;

    // One entry per parent document, never two chunks of the same parent.
    let ids: Vec<&str> = retrieved.iter().map(|d| d.id.as_str()).collect();
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(ids, deduped);
    assert!(ids.contains(&"big"));
    assert!(ids.contains(&"small"));

    let big = retrieved.iter().find(|d| d.id == "big").unwrap();
    assert!(big.is_chunk);
    assert!(big.content.contains("quorumwave"));
}

#[tokio::test]
async fn test_format_rag_context_with_retrieved_documents() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());
    service
        .index_documents(vec![space_doc("n1", "s1", "incident postmortem template")])
        .await
        .unwrap();

    let retrieved = service.retrieve_for_rag("postmortem", "s1", 5, 0.0).await;
    let context = format_rag_context(&retrieved, 100_000);
    assert!(context.starts_with("[Relevant project documents for context:"));
    assert!(context.contains("--- Document: n1.md ---"));
    assert!(context.ends_with("\n]"));

    // A budget too small for even the first document yields nothing.
    assert_eq!(format_rag_context(&retrieved, 60), "");
}

#[tokio::test]
async fn test_removals_cascade_and_persist() {
    let store = Arc::new(MemoryBlobStore::new());
    let mut service = SearchService::new("u1", store.clone());

    service
        .index_documents(vec![
            doc("big", &oversized_content("removeme")),
            space_doc("scoped", "s1", "space scoped note"),
            doc("kept", "stays around"),
        ])
        .await
        .unwrap();

    let removed = service.remove_document("big").await;
    assert!(removed > 1, "parent removal should take its chunks");
    assert!(!service.has_document("big").await);
    assert!(service
        .search("removeme", &SearchState::default())
        .await
        .is_empty());

    assert_eq!(service.remove_documents_by_space("s1").await, 1);
    assert_eq!(service.remove_document("missing").await, 0);

    let status = service.status().await;
    assert_eq!(status.documents, 1);
    assert_eq!(status.bm25.total_docs, 1);

    // The persisted manifest reflects the removals.
    let manifest = store.load_blob(MANIFEST_BLOB).await.unwrap().unwrap();
    let persisted: Vec<Document> = serde_json::from_str(&manifest).unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, "kept");
}

#[tokio::test]
async fn test_state_survives_service_restart() {
    let store = Arc::new(MemoryBlobStore::new());

    let mut first = SearchService::new("u1", store.clone());
    first
        .index_documents(vec![doc("d1", "grafana dashboard provisioning")])
        .await
        .unwrap();
    drop(first);

    let mut second = SearchService::new("u1", store.clone());
    let results = second.search("grafana", &SearchState::default()).await;
    assert_eq!(results.len(), 1);

    let status = second.status().await;
    assert_eq!(status.documents, 1);
    assert_eq!(status.bm25.total_docs, 1);
}

#[tokio::test]
async fn test_corrupt_index_blob_rebuilds_from_manifest() {
    let store = Arc::new(MemoryBlobStore::new());

    let mut first = SearchService::new("u1", store.clone());
    first
        .index_documents(vec![doc("d1", "vault secret rotation policy")])
        .await
        .unwrap();
    drop(first);

    store.save_blob(BM25_INDEX_BLOB, "{not json").await.unwrap();

    let mut second = SearchService::new("u1", store.clone());
    let results = second.search("vault rotation", &SearchState::default()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(second.status().await.bm25.total_docs, 1);
}

#[tokio::test]
async fn test_corrupt_manifest_resets_to_empty() {
    let store = Arc::new(MemoryBlobStore::new());
    store.save_blob(MANIFEST_BLOB, "not json at all").await.unwrap();

    let mut service = SearchService::new("u1", store.clone());
    assert!(service
        .search("anything", &SearchState::default())
        .await
        .is_empty());
    assert_eq!(service.status().await.documents, 0);
}

#[tokio::test]
async fn test_clear_removes_blobs_and_state() {
    let store = Arc::new(MemoryBlobStore::new());
    let mut service = SearchService::new("u1", store.clone());

    service
        .index_documents(vec![doc("d1", "ephemeral content")])
        .await
        .unwrap();
    service.clear().await;

    assert_eq!(store.load_blob(MANIFEST_BLOB).await.unwrap(), None);
    assert_eq!(store.load_blob(BM25_INDEX_BLOB).await.unwrap(), None);
    assert!(service
        .search("ephemeral", &SearchState::default())
        .await
        .is_empty());
    assert_eq!(service.status().await.documents, 0);
}

#[tokio::test]
async fn test_orphan_cleanup_by_space() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());
    service
        .index_documents(vec![
            space_doc("live", "space-live", "active space document"),
            space_doc("dead", "space-dead", "stale space document"),
            doc("unscoped", "no space at all"),
        ])
        .await
        .unwrap();

    let valid: std::collections::HashSet<String> =
        std::iter::once("space-live".to_string()).collect();

    let report = service.orphaned_documents(&valid).await;
    assert_eq!(report.documents, 1);
    assert!(report.by_space.contains_key("space-dead"));

    let cleaned = service.cleanup_orphaned_documents(&valid).await;
    assert_eq!(cleaned, vec!["space-dead".to_string()]);
    assert!(service.has_document("live").await);
    assert!(!service.has_document("dead").await);
    assert!(service.has_document("unscoped").await);

    let spaces = service.referenced_space_ids().await;
    assert_eq!(spaces.len(), 1);
    assert!(spaces.contains("space-live"));
}

#[tokio::test]
async fn test_worker_backed_conversation_search() {
    let mut service = SearchService::new("u1", MemoryBlobStore::new());

    let worker = WorkerHandle::spawn();
    worker
        .populate(vec![(
            "conv-1".to_string(),
            "debugging tokio runtime stalls".to_string(),
        )])
        .await
        .unwrap();
    service.attach_worker(worker);

    let mut state = SearchState::default();
    state.conversations.insert(
        "conv-1".to_string(),
        Conversation {
            id: "conv-1".to_string(),
            title: Some("Runtime debugging".to_string()),
            space_id: None,
            created_at: 10,
        },
    );

    // Worker matches on message text the title alone would miss.
    let results = service.search("tokio", &state).await;
    assert_eq!(results.len(), 1);
    assert!(
        matches!(&results[0], SearchResult::Conversation { conversation_id, .. } if conversation_id == "conv-1")
    );

    // Substring fallback still finds the conversation by title.
    let results = service.search("runtime debugging", &state).await;
    assert!(!results.is_empty());
}
