//! Raw file storage abstraction.
//!
//! Uploaded files are kept verbatim so they can be downloaded again and
//! re-ingested. Keys are `/`-separated paths; the ingestion pipeline uses
//! [`document_key`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// Prefix every document blob lives under.
pub const DOCUMENTS_PREFIX: &str = "documents/";

/// Object key for a document's raw file.
pub fn document_key(document_id: &str, filename: &str) -> String {
    format!("{}{}/{}", DOCUMENTS_PREFIX, document_id, sanitize_filename(filename))
}

/// Document ID encoded in a key produced by [`document_key`].
pub fn document_id_from_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(DOCUMENTS_PREFIX)?;
    let (id, _) = rest.split_once('/')?;
    (!id.is_empty()).then_some(id)
}

/// Reduce a client-supplied filename to a single safe path segment.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}

/// A blob store.
///
/// `delete` of a missing key succeeds, so an interrupted delete can be retried.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
