//! Filesystem object store.
//!
//! Keys map to paths below the root. Writes go to a temporary sibling and
//! are renamed into place so a reader never sees a half-written file.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use kbchat_core::objects::ObjectStore;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve `key` below the root, rejecting anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            bail!("empty object key");
        }
        let rel = Path::new(key);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => bail!("invalid object key: {}", key),
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to move object into {}", path.display()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to delete {}", path.display()))
            }
        }
        // Drop the per-document directory once it is empty; failure is harmless.
        if let Some(parent) = path.parent() {
            if parent != self.root {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&root)?;
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) && !is_temp_file(&key) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await?
    }
}

fn is_temp_file(key: &str) -> bool {
    key.rsplit('.')
        .next()
        .map(|ext| ext.starts_with("tmp-"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_and_idempotent_delete() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path().join("uploads"));

        assert!(store.list("documents/").await.unwrap().is_empty());

        store
            .put("documents/d1/guide.md", b"# Wave picking", "text/markdown")
            .await
            .unwrap();
        store
            .put("documents/d2/notes.txt", b"FIFO", "text/plain")
            .await
            .unwrap();

        assert_eq!(
            store.get("documents/d1/guide.md").await.unwrap().as_deref(),
            Some(&b"# Wave picking"[..])
        );
        assert_eq!(
            store.list("documents/").await.unwrap(),
            vec!["documents/d1/guide.md", "documents/d2/notes.txt"]
        );

        store.delete("documents/d1/guide.md").await.unwrap();
        store.delete("documents/d1/guide.md").await.unwrap();
        assert_eq!(store.get("documents/d1/guide.md").await.unwrap(), None);
        assert!(!tmp.path().join("uploads/documents/d1").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        assert!(store.put("../evil", b"x", "text/plain").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.delete("").await.is_err());
    }
}
