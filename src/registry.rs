//! Document registry.
//!
//! Owns the lifecycle of uploaded documents once they exist: listing,
//! lookup, metadata edits, download of the raw file, deletion and
//! reconciliation of the three places a document lives (the `documents`
//! table, the vector store and object storage).
//!
//! # Delete protocol
//!
//! 1. mark the record `deleting`
//! 2. delete its chunks from the vector store
//! 3. delete its raw blob
//! 4. delete the record
//!
//! Every step is idempotent. If the process dies part-way, the record is
//! left in `deleting` and [`DocumentRegistry::reconcile`] finishes the job.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use kbchat_core::error::RegistryError;
use kbchat_core::models::{Chunk, Document, DocumentStatus, DocumentSummary, MetadataPatch};
use kbchat_core::objects::{document_id_from_key, ObjectStore, DOCUMENTS_PREFIX};
use kbchat_core::store::VectorStore;

use crate::documents::{now, DocumentRepo};
use crate::locks::DocumentLocks;
use crate::retry::CallBounds;

/// A raw file fetched for download.
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What [`DocumentRegistry::reconcile`] repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Documents stuck in `deleting` whose delete was completed.
    pub finished_deletes: Vec<String>,
    /// Documents left in `processing` by an interrupted ingestion, now `error`.
    pub interrupted_ingests: Vec<String>,
    /// Document IDs whose chunks had no record and were removed.
    pub orphan_chunk_documents: Vec<String>,
    /// Object keys with no record that were removed.
    pub orphan_blobs: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.finished_deletes.is_empty()
            && self.interrupted_ingests.is_empty()
            && self.orphan_chunk_documents.is_empty()
            && self.orphan_blobs.is_empty()
    }
}

/// Knowledge-base totals for the viewer and `kbchat stats`.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: u64,
    pub chunks: u64,
    pub total_bytes: u64,
    pub embedding_model: Option<String>,
    pub dims: Option<usize>,
    pub by_status: BTreeMap<String, u64>,
}

pub struct DocumentRegistry {
    docs: DocumentRepo,
    store: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    locks: Arc<DocumentLocks>,
    bounds: CallBounds,
}

fn db_err(e: anyhow::Error) -> RegistryError {
    RegistryError::Database(e)
}

impl DocumentRegistry {
    pub fn new(
        docs: DocumentRepo,
        store: Arc<dyn VectorStore>,
        objects: Arc<dyn ObjectStore>,
        locks: Arc<DocumentLocks>,
        bounds: CallBounds,
    ) -> Self {
        Self {
            docs,
            store,
            objects,
            locks,
            bounds,
        }
    }

    pub async fn list(&self) -> Result<Vec<DocumentSummary>, RegistryError> {
        let docs = self.docs.list().await.map_err(db_err)?;
        Ok(docs.iter().map(Document::summary).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Document, RegistryError> {
        self.docs
            .get(id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Stored chunks of a document, in sequence order.
    pub async fn get_chunks(&self, id: &str) -> Result<Vec<Chunk>, RegistryError> {
        self.get(id).await?;
        self.bounds
            .store("chunks_for_document", || self.store.chunks_for_document(id))
            .await
            .map_err(RegistryError::VectorStore)
    }

    pub async fn download(&self, id: &str) -> Result<Download, RegistryError> {
        let doc = self.get(id).await?;
        let bytes = self
            .bounds
            .object("object get", || self.objects.get(&doc.raw_storage_ref))
            .await
            .map_err(RegistryError::ObjectStore)?
            .ok_or_else(|| {
                tracing::warn!(document_id = id, key = %doc.raw_storage_ref, "raw file missing from object storage");
                RegistryError::NotFound(id.to_string())
            })?;
        Ok(Download {
            filename: doc.filename,
            content_type: doc.content_type,
            bytes,
        })
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        patch: MetadataPatch,
    ) -> Result<Document, RegistryError> {
        let _guard = self.locks.lock(id).await;
        let mut doc = self.get(id).await?;
        doc.derived_metadata.apply(patch);
        doc.updated_at = now();
        self.docs.save(&doc).await.map_err(db_err)?;
        tracing::info!(document_id = id, "metadata updated");
        Ok(doc)
    }

    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let _guard = self.locks.lock(id).await;
        let doc = self.get(id).await?;
        self.docs
            .set_status(id, DocumentStatus::Deleting, None)
            .await
            .map_err(db_err)?;
        self.finish_delete(&doc).await
    }

    /// Steps 2-4 of the delete protocol. Caller holds the document lock.
    async fn finish_delete(&self, doc: &Document) -> Result<(), RegistryError> {
        let removed = self
            .bounds
            .store("delete_document", || self.store.delete_document(&doc.id))
            .await
            .map_err(RegistryError::VectorStore)?;
        self.bounds
            .object("object delete", || self.objects.delete(&doc.raw_storage_ref))
            .await
            .map_err(RegistryError::ObjectStore)?;
        self.docs.delete(&doc.id).await.map_err(db_err)?;
        tracing::info!(document_id = %doc.id, chunks = removed, "document deleted");
        Ok(())
    }

    /// Bring the record table, vector store and object storage back in line.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        let mut report = ReconcileReport::default();

        for id in self
            .docs
            .ids_with_status(DocumentStatus::Deleting)
            .await
            .map_err(db_err)?
        {
            let _guard = self.locks.lock(&id).await;
            if let Some(doc) = self.docs.get(&id).await.map_err(db_err)? {
                if doc.status == DocumentStatus::Deleting {
                    self.finish_delete(&doc).await?;
                    report.finished_deletes.push(id.clone());
                }
            }
        }

        for id in self
            .docs
            .ids_with_status(DocumentStatus::Processing)
            .await
            .map_err(db_err)?
        {
            // An ingestion that is still running holds the lock; waiting for
            // it means the status is final by the time it is re-read.
            let _guard = self.locks.lock(&id).await;
            if let Some(doc) = self.docs.get(&id).await.map_err(db_err)? {
                if doc.status == DocumentStatus::Processing {
                    self.docs
                        .set_status(&id, DocumentStatus::Error, Some("ingestion was interrupted"))
                        .await
                        .map_err(db_err)?;
                    report.interrupted_ingests.push(id.clone());
                }
            }
        }

        let store_ids = self
            .bounds
            .store("document_ids", || self.store.document_ids())
            .await
            .map_err(RegistryError::VectorStore)?;
        for id in store_ids {
            let _guard = self.locks.lock(&id).await;
            if self.docs.get(&id).await.map_err(db_err)?.is_none() {
                self.bounds
                    .store("delete_document", || self.store.delete_document(&id))
                    .await
                    .map_err(RegistryError::VectorStore)?;
                report.orphan_chunk_documents.push(id.clone());
            }
        }

        let keys = self
            .bounds
            .object("object list", || self.objects.list(DOCUMENTS_PREFIX))
            .await
            .map_err(RegistryError::ObjectStore)?;
        let mut known: HashSet<String> = HashSet::new();
        for key in keys {
            let Some(id) = document_id_from_key(&key) else {
                continue;
            };
            if known.contains(id) {
                continue;
            }
            let _guard = self.locks.lock(id).await;
            match self.docs.get(id).await.map_err(db_err)? {
                Some(doc) if doc.raw_storage_ref == key => {
                    known.insert(id.to_string());
                }
                // A record exists but points at another key: a stale upload.
                Some(_) | None => {
                    self.bounds
                        .object("object delete", || self.objects.delete(&key))
                        .await
                        .map_err(RegistryError::ObjectStore)?;
                    report.orphan_blobs.push(key.clone());
                }
            }
        }

        if report.is_clean() {
            tracing::info!("reconcile: nothing to repair");
        } else {
            tracing::info!(
                finished_deletes = report.finished_deletes.len(),
                interrupted_ingests = report.interrupted_ingests.len(),
                orphan_chunk_documents = report.orphan_chunk_documents.len(),
                orphan_blobs = report.orphan_blobs.len(),
                "reconcile complete"
            );
        }
        Ok(report)
    }

    pub async fn stats(&self) -> Result<Stats, RegistryError> {
        let signature = self
            .bounds
            .store("signature", || self.store.signature())
            .await
            .map_err(RegistryError::VectorStore)?;
        let chunks = self
            .bounds
            .store("count", || self.store.count())
            .await
            .map_err(RegistryError::VectorStore)?;

        Ok(Stats {
            documents: self.docs.count().await.map_err(db_err)?,
            chunks: chunks as u64,
            total_bytes: self.docs.total_bytes().await.map_err(db_err)?,
            embedding_model: signature.as_ref().map(|s| s.model.clone()),
            dims: signature.map(|s| s.dims),
            by_status: self.docs.status_counts().await.map_err(db_err)?,
        })
    }

    pub async fn document_count(&self) -> Result<u64, RegistryError> {
        self.docs.count().await.map_err(db_err)
    }
}
