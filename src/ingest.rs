//! Ingestion pipeline.
//!
//! Turns an upload into a searchable document:
//!
//! ```text
//! validate → extract → store blob + record → chunk → embed (batched) → upsert
//! ```
//!
//! Validation and extraction happen before anything is written, so a bad
//! file leaves no trace. After the record exists, a failure leaves it in
//! `error` (nothing stored) or `partial` (some chunks stored); both are
//! repaired by [`IngestPipeline::reingest`], which re-runs from the stored
//! blob. Chunk IDs are deterministic and old chunks are deleted first, so a
//! re-run never duplicates.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use uuid::Uuid;

use kbchat_core::chunk::{chunk_text, ChunkParams};
use kbchat_core::embedding::Embedder;
use kbchat_core::error::{ChunkError, IngestError};
use kbchat_core::models::{ChunkMetadata, DerivedMetadata, Document, DocumentStatus, VectorRecord};
use kbchat_core::objects::{document_key, ObjectStore};
use kbchat_core::store::{check_signature, StoreSignature, VectorStore};

use crate::analyze::Analyzer;
use crate::config::Config;
use crate::documents::{now, DocumentRepo};
use crate::extract::{extract_text, resolve_content_type, MIME_TEXT};
use crate::locks::DocumentLocks;
use crate::retry::{with_timeout, CallBounds};
use crate::scan::scan_path;
use crate::seed::SAMPLES;

/// A file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Declared MIME type; `None` or `application/octet-stream` means "use the extension".
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunk: ChunkParams,
    pub batch_size: usize,
    pub max_file_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub embed_timeout: Duration,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk: config.chunking.params(),
            batch_size: config.embedding.batch_size.max(1),
            max_file_bytes: config.ingest.max_file_bytes,
            allowed_content_types: config.ingest.allowed_content_types.clone(),
            embed_timeout: config.embedding.call_budget(),
        }
    }
}

/// Result of ingesting a directory tree.
#[derive(Debug, Default, Serialize)]
pub struct DirReport {
    pub ingested: Vec<Document>,
    /// `(relative path, error message)` for each file that failed.
    pub failed: Vec<(String, String)>,
}

/// Result of re-ingesting every document under the current embedding model.
#[derive(Debug, Default, Serialize)]
pub struct ReindexReport {
    pub reindexed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct IngestPipeline {
    docs: DocumentRepo,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    analyzer: Analyzer,
    locks: Arc<DocumentLocks>,
    bounds: CallBounds,
    settings: IngestSettings,
}

/// How far indexing got before it stopped.
struct IndexFailure {
    stored: usize,
    total: usize,
    error: IngestError,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        docs: DocumentRepo,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        objects: Arc<dyn ObjectStore>,
        analyzer: Analyzer,
        locks: Arc<DocumentLocks>,
        bounds: CallBounds,
        settings: IngestSettings,
    ) -> Self {
        Self {
            docs,
            embedder,
            store,
            objects,
            analyzer,
            locks,
            bounds,
            settings,
        }
    }

    /// Ingest one upload and return the final document record.
    pub async fn ingest(&self, upload: Upload) -> Result<Document, IngestError> {
        self.ingest_with(upload, None).await
    }

    async fn ingest_with(
        &self,
        upload: Upload,
        preset: Option<DerivedMetadata>,
    ) -> Result<Document, IngestError> {
        let content_type = self.validate(&upload)?;
        let text = extract(upload.bytes.clone(), content_type.clone()).await?;

        let id = Uuid::new_v4().to_string();
        let _guard = self.locks.lock(&id).await;

        let key = document_key(&id, &upload.filename);
        self.bounds
            .object("object put", || self.objects.put(&key, &upload.bytes, &content_type))
            .await
            .map_err(IngestError::ObjectStore)?;

        let uploaded = now();
        let mut doc = Document {
            id: id.clone(),
            filename: upload.filename.trim().to_string(),
            content_type,
            size_bytes: upload.bytes.len() as u64,
            upload_time: uploaded,
            updated_at: uploaded,
            raw_storage_ref: key,
            derived_metadata: DerivedMetadata::default(),
            status: DocumentStatus::Processing,
            chunk_count: 0,
            word_count: 0,
            error: None,
        };
        doc.derived_metadata = match preset {
            Some(meta) => meta,
            None => self.analyzer.analyze(&doc.filename, &text).await,
        };

        if let Err(e) = self.docs.save(&doc).await {
            // The blob has no record; reconcile would collect it, but it is cheap to drop now.
            let _ = self.objects.delete(&doc.raw_storage_ref).await;
            return Err(IngestError::Internal(e));
        }
        tracing::info!(document_id = %id, filename = %doc.filename, content_type = %doc.content_type, "document accepted");

        self.index(doc, &text).await
    }

    /// Re-run ingestion of a stored document from its raw blob.
    pub async fn reingest(&self, id: &str) -> Result<Document, IngestError> {
        let _guard = self.locks.lock(id).await;

        let mut doc = self
            .docs
            .get(id)
            .await
            .map_err(IngestError::Internal)?
            .ok_or_else(|| IngestError::NotFound(id.to_string()))?;
        if doc.status == DocumentStatus::Deleting {
            return Err(IngestError::NotFound(id.to_string()));
        }

        let bytes = self
            .bounds
            .object("object get", || self.objects.get(&doc.raw_storage_ref))
            .await
            .map_err(IngestError::ObjectStore)?
            .ok_or_else(|| {
                IngestError::ObjectStore(anyhow!(
                    "raw file {} is missing from object storage",
                    doc.raw_storage_ref
                ))
            })?;

        let text = match extract(bytes, doc.content_type.clone()).await {
            Ok(text) => text,
            Err(e) => {
                self.mark(&doc.id, DocumentStatus::Error, &e).await;
                return Err(e);
            }
        };

        doc.status = DocumentStatus::Processing;
        doc.error = None;
        doc.updated_at = now();
        self.docs.save(&doc).await.map_err(IngestError::Internal)?;
        tracing::info!(document_id = id, "re-ingesting");

        self.index(doc, &text).await
    }

    /// Ingest the built-in sample documents that are not present yet.
    pub async fn seed_samples(&self) -> Result<Vec<Document>, IngestError> {
        let existing: HashSet<String> = self
            .docs
            .list()
            .await
            .map_err(IngestError::Internal)?
            .into_iter()
            .map(|d| d.filename)
            .collect();

        let mut seeded = Vec::new();
        for sample in SAMPLES {
            if existing.contains(sample.filename) {
                continue;
            }
            let upload = Upload {
                bytes: sample.text.as_bytes().to_vec(),
                filename: sample.filename.to_string(),
                content_type: Some(MIME_TEXT.to_string()),
            };
            let meta = DerivedMetadata {
                title: Some(sample.title.to_string()),
                category: Some(sample.category.to_string()),
                topics: Vec::new(),
                summary: None,
            };
            seeded.push(self.ingest_with(upload, Some(meta)).await?);
        }
        tracing::info!(seeded = seeded.len(), "sample knowledge base loaded");
        Ok(seeded)
    }

    /// Ingest every matching file under `root` (or `root` itself if it is a file).
    /// Per-file failures are collected, not fatal.
    pub async fn ingest_path(
        &self,
        root: &Path,
        config: &crate::config::IngestConfig,
    ) -> anyhow::Result<DirReport> {
        let mut report = DirReport::default();
        for file in scan_path(root, config)? {
            let bytes = match tokio::fs::read(&file.path).await {
                Ok(b) => b,
                Err(e) => {
                    report.failed.push((file.relative, e.to_string()));
                    continue;
                }
            };
            let filename = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.relative.clone());
            let upload = Upload {
                bytes,
                filename,
                content_type: None,
            };
            match self.ingest(upload).await {
                Ok(doc) => report.ingested.push(doc),
                Err(e) => {
                    tracing::warn!(path = %file.relative, error = %e, "ingest failed");
                    report.failed.push((file.relative, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Clear the store signature and rebuild every document's chunks with
    /// the configured embedder. Used after an embedding-model change.
    pub async fn reindex_all(&self) -> Result<ReindexReport, IngestError> {
        let docs = self.docs.list().await.map_err(IngestError::Internal)?;

        for doc in &docs {
            self.bounds
                .store("delete_document", || self.store.delete_document(&doc.id))
                .await
                .map_err(IngestError::VectorStore)?;
        }
        let leftovers = self
            .bounds
            .store("count", || self.store.count())
            .await
            .map_err(IngestError::VectorStore)?;
        if leftovers > 0 {
            return Err(IngestError::VectorStore(anyhow!(
                "{} chunks belong to unknown documents; run `kbchat reconcile` first",
                leftovers
            )));
        }
        self.bounds
            .store("set_signature", || self.store.set_signature(None))
            .await
            .map_err(IngestError::VectorStore)?;

        let mut report = ReindexReport::default();
        for doc in docs {
            if doc.status == DocumentStatus::Deleting {
                continue;
            }
            match self.reingest(&doc.id).await {
                Ok(_) => report.reindexed.push(doc.id),
                Err(e) => report.failed.push((doc.id, e.to_string())),
            }
        }
        Ok(report)
    }

    // ============ Stages ============

    fn validate(&self, upload: &Upload) -> Result<String, IngestError> {
        if upload.filename.trim().is_empty() {
            return Err(IngestError::Validation("filename is required".into()));
        }
        if upload.bytes.is_empty() {
            return Err(IngestError::Validation("file is empty".into()));
        }
        let size = upload.bytes.len() as u64;
        if size > self.settings.max_file_bytes {
            return Err(IngestError::TooLarge {
                size,
                limit: self.settings.max_file_bytes,
            });
        }
        let content_type = resolve_content_type(&upload.filename, upload.content_type.as_deref());
        if !self
            .settings
            .allowed_content_types
            .iter()
            .any(|t| t == &content_type)
        {
            return Err(IngestError::UnsupportedType(content_type));
        }
        Ok(content_type)
    }

    /// Chunk, embed and store `text` for `doc`, then record the outcome.
    /// Caller holds the document lock and has saved `doc` as `processing`.
    async fn index(&self, mut doc: Document, text: &str) -> Result<Document, IngestError> {
        let word_count = text.split_whitespace().count() as u64;

        match self.write_chunks(&doc, text).await {
            Ok(stored) => {
                doc.status = DocumentStatus::Processed;
                doc.chunk_count = stored as u64;
                doc.word_count = word_count;
                doc.error = None;
                doc.updated_at = now();
                self.docs.save(&doc).await.map_err(IngestError::Internal)?;
                tracing::info!(document_id = %doc.id, chunks = stored, words = word_count, "document processed");
                Ok(doc)
            }
            Err(failure) => {
                let message = failure.error.to_string();
                doc.chunk_count = failure.stored as u64;
                doc.word_count = word_count;
                doc.error = Some(message.clone());
                doc.updated_at = now();
                doc.status = if failure.stored > 0 {
                    DocumentStatus::Partial
                } else {
                    DocumentStatus::Error
                };
                if let Err(e) = self.docs.save(&doc).await {
                    tracing::error!(document_id = %doc.id, error = %e, "failed to record ingestion failure");
                }
                tracing::warn!(
                    document_id = %doc.id,
                    stored = failure.stored,
                    total = failure.total,
                    error = %message,
                    "ingestion failed"
                );

                if failure.stored > 0 {
                    Err(IngestError::PartialIngestion {
                        document_id: doc.id,
                        stored: failure.stored,
                        total: failure.total,
                        reason: message,
                    })
                } else {
                    Err(failure.error)
                }
            }
        }
    }

    async fn write_chunks(&self, doc: &Document, text: &str) -> Result<usize, IndexFailure> {
        let early = |error: IngestError| IndexFailure {
            stored: 0,
            total: 0,
            error,
        };

        self.ensure_signature().await.map_err(early)?;

        self.bounds
            .store("delete_document", || self.store.delete_document(&doc.id))
            .await
            .map_err(|e| early(IngestError::VectorStore(e)))?;

        let chunks = chunk_text(&doc.id, text, self.settings.chunk).map_err(|e| match e {
            ChunkError::EmptyInput => early(IngestError::ExtractionFailed(e.to_string())),
            ChunkError::InvalidParams(_) => early(IngestError::Internal(anyhow!(e))),
        })?;
        let total = chunks.len();

        let metadata = ChunkMetadata {
            filename: doc.filename.clone(),
            content_type: doc.content_type.clone(),
            title: doc.derived_metadata.title.clone(),
            category: doc.derived_metadata.category.clone(),
        };

        let mut stored = 0usize;
        for batch in chunks.chunks(self.settings.batch_size) {
            let fail = |error: IngestError| IndexFailure {
                stored,
                total,
                error,
            };

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = with_timeout(
                self.settings.embed_timeout,
                "embedding",
                self.embedder.embed(&texts),
            )
            .await
            .map_err(|e| fail(IngestError::EmbeddingService(e)))?;

            if vectors.len() != batch.len() {
                return Err(fail(IngestError::EmbeddingService(anyhow!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                ))));
            }

            for (chunk, embedding) in batch.iter().zip(vectors) {
                let record = VectorRecord {
                    chunk: chunk.clone(),
                    embedding,
                    metadata: metadata.clone(),
                };
                self.bounds
                    .store("upsert", || self.store.upsert(&record))
                    .await
                    .map_err(|e| IndexFailure {
                        stored,
                        total,
                        error: IngestError::VectorStore(e),
                    })?;
                stored += 1;
            }
        }

        Ok(stored)
    }

    /// Refuse to mix embedding models in one store; record the signature on first use.
    async fn ensure_signature(&self) -> Result<(), IngestError> {
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();
        if dims == 0 {
            return Err(IngestError::EmbeddingService(anyhow!(
                "embedding provider '{}' is not usable; configure [embedding]",
                model
            )));
        }

        let existing = self
            .bounds
            .store("signature", || self.store.signature())
            .await
            .map_err(IngestError::VectorStore)?;
        check_signature(existing.as_ref(), model, dims).map_err(IngestError::ModelMismatch)?;

        if existing.is_none() {
            let sig = StoreSignature::new(model, dims);
            self.bounds
                .store("set_signature", || self.store.set_signature(Some(&sig)))
                .await
                .map_err(IngestError::VectorStore)?;
            tracing::info!(model, dims, "store signature recorded");
        }
        Ok(())
    }

    async fn mark(&self, id: &str, status: DocumentStatus, error: &IngestError) {
        let message = error.to_string();
        if let Err(e) = self.docs.set_status(id, status, Some(&message)).await {
            tracing::error!(document_id = id, error = %e, "failed to update document status");
        }
    }
}

/// Run text extraction off the async runtime.
async fn extract(bytes: Vec<u8>, content_type: String) -> Result<String, IngestError> {
    tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type))
        .await
        .map_err(|e| IngestError::Internal(anyhow!("extraction task failed: {}", e)))?
        .map_err(|e| IngestError::ExtractionFailed(e.to_string()))
}
