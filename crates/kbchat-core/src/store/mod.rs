//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the pipelines need from a
//! vector database: signature bookkeeping, upserts keyed by chunk ID,
//! nearest-neighbour queries, and per-document listing and deletion.
//! Backends are SQLite (app crate) and [`memory::InMemoryVectorStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SignatureMismatch;
use crate::models::{Chunk, ChunkMatch, VectorRecord};

/// Embedding model identity a store's vectors were produced by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSignature {
    pub model: String,
    pub dims: usize,
}

impl StoreSignature {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
        }
    }
}

/// Compare a store's recorded signature with the configured embedder.
///
/// A store without a signature accepts any model.
pub fn check_signature(
    existing: Option<&StoreSignature>,
    model: &str,
    dims: usize,
) -> Result<(), SignatureMismatch> {
    match existing {
        Some(sig) if sig.model != model || sig.dims != dims => Err(SignatureMismatch {
            store_model: sig.model.clone(),
            store_dims: sig.dims,
            model: model.to_string(),
            dims,
        }),
        _ => Ok(()),
    }
}

/// Abstract vector database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`signature`](VectorStore::signature) | Model + dims the stored vectors use |
/// | [`set_signature`](VectorStore::set_signature) | Record (or clear) the signature |
/// | [`upsert`](VectorStore::upsert) | Insert or replace one chunk by ID |
/// | [`query`](VectorStore::query) | Cosine nearest neighbours |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document's chunks |
/// | [`chunks_for_document`](VectorStore::chunks_for_document) | Ordered chunks of a document |
/// | [`document_ids`](VectorStore::document_ids) | Documents with at least one chunk |
/// | [`count`](VectorStore::count) | Total chunks |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn signature(&self) -> Result<Option<StoreSignature>>;

    /// Record the signature, or clear it with `None`. Clearing is only
    /// allowed while the store holds no vectors.
    async fn set_signature(&self, signature: Option<&StoreSignature>) -> Result<()>;

    /// Insert or replace a chunk. Fails if the embedding length differs from
    /// the recorded signature's dims, or no signature is recorded.
    async fn upsert(&self, record: &VectorRecord) -> Result<()>;

    /// The best `top_k` matches for `embedding`, cut after ordering with
    /// [`rank_matches`](crate::search::rank_matches) so equal scores are
    /// selected deterministically.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkMatch>>;

    /// Delete every chunk of a document. Returns how many were removed;
    /// deleting an unknown document is not an error.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn document_ids(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_signature() {
        let sig = StoreSignature::new("text-embedding-ada-002", 1536);
        assert!(check_signature(None, "anything", 3).is_ok());
        assert!(check_signature(Some(&sig), "text-embedding-ada-002", 1536).is_ok());

        let err = check_signature(Some(&sig), "nomic-embed-text", 768).unwrap_err();
        assert_eq!(err.store_model, "text-embedding-ada-002");
        assert_eq!(err.dims, 768);
        assert!(check_signature(Some(&sig), "text-embedding-ada-002", 768).is_err());
    }
}
