//! Core data models shared by the ingestion and query pipelines.
//!
//! A [`Document`] owns an ordered set of [`Chunk`]s. Chunks are what the
//! vector store indexes; each one carries a [`ChunkMetadata`] copy of the
//! document fields a search result needs, because the store cannot join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Upload accepted, chunks are being written.
    Processing,
    /// Every chunk is embedded and stored.
    Processed,
    /// Some chunks were stored before a failure. Safe to re-ingest.
    Partial,
    /// Nothing usable was stored.
    Error,
    /// A delete started and has not finished yet.
    Deleting,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "partial" => Some(DocumentStatus::Partial),
            "error" => Some(DocumentStatus::Error),
            "deleting" => Some(DocumentStatus::Deleting),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive fields produced by the analysis step or edited by an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetadata {
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub summary: Option<String>,
}

/// Partial update for [`DerivedMetadata`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub topics: Option<Vec<String>>,
    pub summary: Option<String>,
}

impl DerivedMetadata {
    pub fn apply(&mut self, patch: MetadataPatch) {
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(category) = patch.category {
            self.category = Some(category);
        }
        if let Some(topics) = patch.topics {
            self.topics = topics;
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }
    }
}

/// An uploaded file and its ingestion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub upload_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Key of the raw file in object storage.
    pub raw_storage_ref: String,
    pub derived_metadata: DerivedMetadata,
    pub status: DocumentStatus,
    pub chunk_count: u64,
    pub word_count: u64,
    /// Message of the last failure, cleared on success.
    pub error: Option<String>,
}

impl Document {
    /// Title for display: the derived title, falling back to the filename.
    pub fn display_title(&self) -> &str {
        self.derived_metadata
            .title
            .as_deref()
            .unwrap_or(&self.filename)
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            title: self.display_title().to_string(),
            category: self.derived_metadata.category.clone(),
            content_type: self.content_type.clone(),
            size_bytes: self.size_bytes,
            upload_time: self.upload_time,
            status: self.status,
            chunk_count: self.chunk_count,
            word_count: self.word_count,
        }
    }
}

/// Lightweight listing row for the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub title: String,
    pub category: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    pub upload_time: DateTime<Utc>,
    pub status: DocumentStatus,
    pub chunk_count: u64,
    pub word_count: u64,
}

/// Document fields copied onto every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub content_type: String,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// A passage of a document's extracted text.
///
/// `start..end` is the byte range of `text` within the extracted text.
/// Consecutive chunks may overlap: the overlap with the previous chunk is
/// `previous.end - self.start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: u32,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk ready for the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A ranked hit from a vector query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: u32,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a chat. The backend keeps no history of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::Partial,
            DocumentStatus::Error,
            DocumentStatus::Deleting,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("done"), None);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut meta = DerivedMetadata {
            title: Some("Old".into()),
            category: Some("Inventory".into()),
            topics: vec!["fifo".into()],
            summary: None,
        };
        meta.apply(MetadataPatch {
            title: Some("New".into()),
            ..Default::default()
        });
        assert_eq!(meta.title.as_deref(), Some("New"));
        assert_eq!(meta.category.as_deref(), Some("Inventory"));
        assert_eq!(meta.topics, vec!["fifo".to_string()]);
    }

    #[test]
    fn turn_role_serializes_lowercase() {
        let turn = ConversationTurn::user("hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
    }
}
