//! Blob persistence boundary.
//!
//! The search engine persists exactly two blobs per user — the document
//! manifest (JSON array of documents) and the serialized BM25 index —
//! addressed by well-known keys. [`BlobStore`] keeps that contract
//! opaque so backends are pluggable: SQLite for the CLI, in-memory for
//! tests and embedding into a host application.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

/// Well-known key for the document manifest blob.
pub const MANIFEST_BLOB: &str = "document_manifest";
/// Well-known key for the serialized BM25 index blob.
pub const BM25_INDEX_BLOB: &str = "bm25_index";

/// Opaque key/value blob storage scoped to one user.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn save_blob(&self, key: &str, value: &str) -> Result<()>;

    /// Load the value stored under `key`, or `None` if absent.
    async fn load_blob(&self, key: &str) -> Result<Option<String>>;

    /// Delete the value stored under `key`. Absent keys are a no-op.
    async fn remove_blob(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    async fn save_blob(&self, key: &str, value: &str) -> Result<()> {
        (**self).save_blob(key, value).await
    }

    async fn load_blob(&self, key: &str) -> Result<Option<String>> {
        (**self).load_blob(key).await
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        (**self).remove_blob(key).await
    }
}

/// In-memory store for tests and host-embedded use.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save_blob(&self, key: &str, value: &str) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn load_blob(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.read().unwrap().get(key).cloned())
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        self.blobs.write().unwrap().remove(key);
        Ok(())
    }
}
