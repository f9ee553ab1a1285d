//! In-memory [`ObjectStore`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::ObjectStore;

#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| anyhow!("in-memory object store lock poisoned"))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_list() {
        let store = InMemoryObjectStore::new();
        store.put("documents/a/x.txt", b"hello", "text/plain").await.unwrap();
        store.put("other/b", b"x", "text/plain").await.unwrap();
        assert_eq!(
            store.get("documents/a/x.txt").await.unwrap().as_deref(),
            Some(&b"hello"[..])
        );
        assert_eq!(store.list("documents/").await.unwrap(), vec!["documents/a/x.txt"]);
        store.delete("documents/a/x.txt").await.unwrap();
        store.delete("documents/a/x.txt").await.unwrap();
        assert_eq!(store.get("documents/a/x.txt").await.unwrap(), None);
    }
}
