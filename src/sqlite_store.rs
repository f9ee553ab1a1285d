//! SQLite-backed [`VectorStore`].
//!
//! Chunk text and metadata live in `chunks`, vectors in `chunk_vectors`
//! as little-endian f32 BLOBs, and the signature in `store_meta`. Queries
//! load every vector and rank by brute-force cosine similarity, which is
//! adequate for a knowledge base of a few thousand chunks.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use kbchat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use kbchat_core::models::{Chunk, ChunkMatch, ChunkMetadata, VectorRecord};
use kbchat_core::search::rank_matches;
use kbchat_core::store::{StoreSignature, VectorStore};

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn signature(&self) -> Result<Option<StoreSignature>> {
        let rows = sqlx::query("SELECT key, value FROM store_meta WHERE key IN (?, ?)")
            .bind(META_MODEL)
            .bind(META_DIMS)
            .fetch_all(&self.pool)
            .await?;

        let mut model = None;
        let mut dims = None;
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_MODEL => model = Some(value),
                META_DIMS => dims = Some(value.parse::<usize>()?),
                _ => {}
            }
        }

        Ok(match (model, dims) {
            (Some(model), Some(dims)) => Some(StoreSignature { model, dims }),
            _ => None,
        })
    }

    async fn set_signature(&self, signature: Option<&StoreSignature>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match signature {
            Some(sig) => {
                for (key, value) in [(META_MODEL, sig.model.clone()), (META_DIMS, sig.dims.to_string())] {
                    sqlx::query(
                        "INSERT INTO store_meta (key, value) VALUES (?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            None => {
                let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
                    .fetch_one(&mut *tx)
                    .await?;
                if remaining > 0 {
                    bail!(
                        "cannot clear the store signature while {} vectors remain",
                        remaining
                    );
                }
                sqlx::query("DELETE FROM store_meta WHERE key IN (?, ?)")
                    .bind(META_MODEL)
                    .bind(META_DIMS)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert(&self, record: &VectorRecord) -> Result<()> {
        let dims = match self.signature().await? {
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

        let chunk = &record.chunk;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, start_offset, end_offset,
                                hash, filename, content_type, title, category)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                hash = excluded.hash,
                filename = excluded.filename,
                content_type = excluded.content_type,
                title = excluded.title,
                category = excluded.category
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index as i64)
        .bind(&chunk.text)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(&chunk.hash)
        .bind(&record.metadata.filename)
        .bind(&record.metadata.content_type)
        .bind(&record.metadata.title)
        .bind(&record.metadata.category)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(vec_to_blob(&record.embedding))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ChunkMatch>> {
        if let Some(sig) = self.signature().await? {
            if embedding.len() != sig.dims {
                bail!(
                    "query vector has {} dims, store expects {}",
                    embedding.len(),
                    sig.dims
                );
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.chunk_index, c.text,
                   c.filename, c.content_type, c.title, c.category
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let index: i64 = row.get("chunk_index");
                ChunkMatch {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    sequence_index: index as u32,
                    score: cosine_similarity(embedding, &vec),
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        filename: row.get("filename"),
                        content_type: row.get("content_type"),
                        title: row.get("title"),
                        category: row.get("category"),
                    },
                }
            })
            .collect();

        rank_matches(&mut matches);
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, start_offset, end_offset, hash
            FROM chunks
            WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let index: i64 = row.get("chunk_index");
                let start: i64 = row.get("start_offset");
                let end: i64 = row.get("end_offset");
                Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    sequence_index: index as u32,
                    text: row.get("text"),
                    start: start as usize,
                    end: end as usize,
                    hash: row.get("hash"),
                }
            })
            .collect())
    }

    async fn document_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT document_id FROM chunks ORDER BY document_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteVectorStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("kb.sqlite"))
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        (tmp, SqliteVectorStore::new(pool))
    }

    fn record(doc: &str, idx: u32, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                id: kbchat_core::chunk::chunk_id(doc, idx),
                document_id: doc.to_string(),
                sequence_index: idx,
                text: format!("{} chunk {}", doc, idx),
                start: idx as usize * 10,
                end: idx as usize * 10 + 10,
                hash: "h".to_string(),
            },
            embedding,
            metadata: ChunkMetadata {
                filename: format!("{}.txt", doc),
                content_type: "text/plain".to_string(),
                title: Some(doc.to_uppercase()),
                category: None,
            },
        }
    }

    #[tokio::test]
    async fn test_signature_round_trip() {
        let (_tmp, store) = store().await;
        assert_eq!(store.signature().await.unwrap(), None);
        let sig = StoreSignature::new("text-embedding-ada-002", 3);
        store.set_signature(Some(&sig)).await.unwrap();
        assert_eq!(store.signature().await.unwrap(), Some(sig));
    }

    #[tokio::test]
    async fn test_upsert_query_delete() {
        let (_tmp, store) = store().await;
        store
            .set_signature(Some(&StoreSignature::new("m", 2)))
            .await
            .unwrap();

        assert!(store.upsert(&record("a", 0, vec![1.0])).await.is_err());

        store.upsert(&record("a", 0, vec![1.0, 0.0])).await.unwrap();
        store.upsert(&record("a", 1, vec![0.6, 0.8])).await.unwrap();
        store.upsert(&record("b", 0, vec![0.0, 1.0])).await.unwrap();
        // replacing by id does not duplicate
        store.upsert(&record("a", 0, vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "a");
        assert_eq!(hits[0].metadata.filename, "a.txt");
        assert_eq!(hits[0].metadata.title.as_deref(), Some("A"));

        let chunks = store.chunks_for_document("a").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start, 10);

        assert_eq!(store.document_ids().await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.delete_document("a").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.set_signature(None).await.is_err());
    }

    #[tokio::test]
    async fn test_equal_scores_cut_by_sequence_then_document() {
        let (_tmp, store) = store().await;
        store
            .set_signature(Some(&StoreSignature::new("m", 2)))
            .await
            .unwrap();
        for idx in (0..10).rev() {
            store.upsert(&record("b", idx, vec![1.0, 0.0])).await.unwrap();
        }
        let hits = store.query(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sequence_index, 0);

        store.upsert(&record("a", 0, vec![1.0, 0.0])).await.unwrap();
        let hits = store.query(&[1.0, 0.0], 3).await.unwrap();
        let picked: Vec<(&str, u32)> = hits
            .iter()
            .map(|h| (h.document_id.as_str(), h.sequence_index))
            .collect();
        assert_eq!(picked, vec![("a", 0), ("b", 0), ("b", 1)]);
    }
}
