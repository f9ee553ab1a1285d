//! Error types for the kbchat pipelines.
//!
//! Adapters (HTTP providers, SQLite, object storage) report failures as
//! [`anyhow::Error`]; the pipelines classify them into the stage variants
//! below so callers can tell which dependency failed.

use thiserror::Error;

/// Chunking failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("no text to chunk")]
    EmptyInput,

    #[error("invalid chunk parameters: {0}")]
    InvalidParams(String),
}

/// Embedding model identity a store was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMismatch {
    pub store_model: String,
    pub store_dims: usize,
    pub model: String,
    pub dims: usize,
}

impl std::fmt::Display for SignatureMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "store was built with {} ({} dims) but the configured model is {} ({} dims)",
            self.store_model, self.store_dims, self.model, self.dims
        )
    }
}

/// Ingestion failures.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Bad input. Reported before any external call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The content type is not on the allow-list.
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    /// The upload exceeds the configured size limit.
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("embedding service failed: {0:#}")]
    EmbeddingService(anyhow::Error),

    #[error("vector store failed: {0:#}")]
    VectorStore(anyhow::Error),

    #[error("object storage failed: {0:#}")]
    ObjectStore(anyhow::Error),

    #[error("embedding model mismatch: {0}")]
    ModelMismatch(SignatureMismatch),

    /// Some chunks were stored before a failure; the document is marked partial.
    #[error("document {document_id} partially ingested: {stored} of {total} chunks stored ({reason})")]
    PartialIngestion {
        document_id: String,
        stored: usize,
        total: usize,
        reason: String,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

/// Query pipeline failures.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("embedding model mismatch: {0}")]
    ModelMismatch(SignatureMismatch),

    #[error("embedding service failed: {0:#}")]
    EmbeddingService(anyhow::Error),

    #[error("vector store failed: {0:#}")]
    VectorStore(anyhow::Error),

    /// Retrieval found nothing to ground an answer on.
    #[error("no relevant context found for the question")]
    NoContext,

    #[error("completion service failed: {0:#}")]
    CompletionService(anyhow::Error),
}

/// Document registry failures.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("object storage failed: {0:#}")]
    ObjectStore(anyhow::Error),

    #[error("vector store failed: {0:#}")]
    VectorStore(anyhow::Error),

    #[error("database error: {0:#}")]
    Database(anyhow::Error),
}

impl From<RegistryError> for IngestError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => IngestError::NotFound(id),
            RegistryError::ObjectStore(e) => IngestError::ObjectStore(e),
            RegistryError::VectorStore(e) => IngestError::VectorStore(e),
            RegistryError::Database(e) => IngestError::Internal(e),
        }
    }
}
