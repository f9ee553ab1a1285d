//! SQLite persistence for [`Document`] records.
//!
//! Timestamps are stored as Unix milliseconds, topics as a JSON array.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use kbchat_core::models::{DerivedMetadata, Document, DocumentStatus};

const DOCUMENT_COLUMNS: &str = "id, filename, content_type, size_bytes, upload_time, updated_at, \
     raw_storage_ref, title, category, topics_json, summary, status, chunk_count, word_count, error";

/// Current time at the millisecond precision the table keeps.
pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[derive(Clone)]
pub struct DocumentRepo {
    pool: SqlitePool,
}

impl DocumentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace a document row.
    pub async fn save(&self, doc: &Document) -> Result<()> {
        let topics_json = serde_json::to_string(&doc.derived_metadata.topics)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content_type, size_bytes, upload_time, updated_at,
                                   raw_storage_ref, title, category, topics_json, summary, status,
                                   chunk_count, word_count, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at,
                raw_storage_ref = excluded.raw_storage_ref,
                title = excluded.title,
                category = excluded.category,
                topics_json = excluded.topics_json,
                summary = excluded.summary,
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                word_count = excluded.word_count,
                error = excluded.error
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.size_bytes as i64)
        .bind(doc.upload_time.timestamp_millis())
        .bind(doc.updated_at.timestamp_millis())
        .bind(&doc.raw_storage_ref)
        .bind(&doc.derived_metadata.title)
        .bind(&doc.derived_metadata.category)
        .bind(topics_json)
        .bind(&doc.derived_metadata.summary)
        .bind(doc.status.as_str())
        .bind(doc.chunk_count as i64)
        .bind(doc.word_count as i64)
        .bind(&doc.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    /// Newest first; ties broken by ID.
    pub async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY upload_time DESC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    pub async fn ids_with_status(&self, status: DocumentStatus) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn status_counts(&self) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM documents GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get::<String, _>("status"), n as u64)
            })
            .collect())
    }

    pub async fn total_bytes(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let topics_json: String = row.get("topics_json");
    let upload_time: i64 = row.get("upload_time");
    let updated_at: i64 = row.get("updated_at");
    let size_bytes: i64 = row.get("size_bytes");
    let chunk_count: i64 = row.get("chunk_count");
    let word_count: i64 = row.get("word_count");

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        size_bytes: size_bytes as u64,
        upload_time: DateTime::from_timestamp_millis(upload_time).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
        raw_storage_ref: row.get("raw_storage_ref"),
        derived_metadata: DerivedMetadata {
            title: row.get("title"),
            category: row.get("category"),
            topics: serde_json::from_str(&topics_json).unwrap_or_default(),
            summary: row.get("summary"),
        },
        status: DocumentStatus::parse(&status)
            .with_context(|| format!("unknown document status '{}'", status))?,
        chunk_count: chunk_count as u64,
        word_count: word_count as u64,
        error: row.get("error"),
    })
}
