//! In-memory [`VectorStore`] for tests and throwaway runs.
//!
//! A `HashMap` of chunk ID → record behind `std::sync::RwLock`. Queries
//! are brute-force cosine similarity over every stored vector.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ChunkMatch, VectorRecord};
use crate::search::rank_matches;

use super::{StoreSignature, VectorStore};

#[derive(Default)]
struct Inner {
    signature: Option<StoreSignature>,
    records: HashMap<String, VectorRecord>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory vector store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn signature(&self) -> Result<Option<StoreSignature>> {
        Ok(self.read()?.signature.clone())
    }

    async fn set_signature(&self, signature: Option<&StoreSignature>) -> Result<()> {
        let mut inner = self.write()?;
        if signature.is_none() && !inner.records.is_empty() {
            bail!(
                "cannot clear the store signature while {} vectors remain",
                inner.records.len()
            );
        }
        inner.signature = signature.cloned();
        Ok(())
    }

    async fn upsert(&self, record: &VectorRecord) -> Result<()> {
        let mut inner = self.write()?;
        let dims = match &inner.signature {
            Some(sig) => sig.dims,
            None => bail!("store signature not set; refusing to store vectors"),
        };
        if record.embedding.len() != dims {
            bail!(
                "vector for chunk {} has {} dims, store expects {}",
                record.chunk.id,
                record.embedding.len(),
                dims
            );
        }
        inner
            .records
            .insert(record.chunk.id.clone(), record.clone());
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkMatch>> {
        let inner = self.read()?;
        if let Some(sig) = &inner.signature {
            if embedding.len() != sig.dims {
                bail!(
                    "query vector has {} dims, store expects {}",
                    embedding.len(),
                    sig.dims
                );
            }
        }

        let mut scored: Vec<ChunkMatch> = inner
            .records
            .values()
            .map(|r| ChunkMatch {
                chunk_id: r.chunk.id.clone(),
                document_id: r.chunk.document_id.clone(),
                sequence_index: r.chunk.sequence_index,
                score: cosine_similarity(embedding, &r.embedding),
                text: r.chunk.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();

        rank_matches(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| r.chunk.document_id != document_id);
        Ok(before - inner.records.len())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .records
            .values()
            .filter(|r| r.chunk.document_id == document_id)
            .map(|r| r.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);
        Ok(chunks)
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let ids: BTreeSet<String> = inner
            .records
            .values()
            .map(|r| r.chunk.document_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }
}
