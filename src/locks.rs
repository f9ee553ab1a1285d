//! Per-document serialization.
//!
//! Ingest, re-ingest and delete of the same document ID run one at a time;
//! different documents proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct DocumentLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one operation on a document.
pub struct DocumentGuard {
    _guard: OwnedMutexGuard<()>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, document_id: &str) -> DocumentGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries nobody is holding or waiting on can go.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        DocumentGuard {
            _guard: slot.lock_owned().await,
        }
    }
}
