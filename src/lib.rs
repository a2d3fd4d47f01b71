//! # Quarry
//!
//! A local-first document search engine: documents are tokenized,
//! chunked at semantic boundaries when oversized, and ranked with Okapi
//! BM25. A per-user [`service::SearchService`] orchestrates indexing,
//! combined search over documents/conversations/projects, and
//! space-scoped retrieval for RAG context assembly, persisting its state
//! as two blobs through the pluggable [`store::BlobStore`] boundary.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`tokenize`] | Lowercasing word tokenizer and stopword list |
//! | [`bm25`] | Statistics-only Okapi BM25 index |
//! | [`chunker`] | Semantic-boundary document chunking and chunk merging |
//! | [`models`] | Documents, conversations, spaces, results |
//! | [`store`] | Blob persistence trait + in-memory backend |
//! | [`sqlite_store`] | SQLite blob backend |
//! | [`worker`] | Background conversation full-text worker |
//! | [`service`] | Per-user orchestration and the instance registry |
//! | [`config`] | TOML configuration |
//! | [`ingest`] | Filesystem scanning into documents |

pub mod bm25;
pub mod chunker;
pub mod config;
pub mod ingest;
pub mod models;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod tokenize;
pub mod worker;
