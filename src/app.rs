//! Application wiring.
//!
//! [`App`] owns every service built from one [`Config`]: the document
//! registry, the ingestion pipeline and the query pipeline, all sharing the
//! same stores, embedder and per-document locks. The HTTP server and the
//! CLI both work through it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use kbchat_core::completion::ChatModel;
use kbchat_core::embedding::Embedder;
use kbchat_core::objects::ObjectStore;
use kbchat_core::store::memory::InMemoryVectorStore;
use kbchat_core::store::VectorStore;

use crate::analyze::Analyzer;
use crate::answer::{QueryPipeline, QuerySettings};
use crate::completion::create_chat_model;
use crate::config::Config;
use crate::db;
use crate::documents::DocumentRepo;
use crate::embedding::create_embedder;
use crate::ingest::{IngestPipeline, IngestSettings};
use crate::locks::DocumentLocks;
use crate::migrate::migrate;
use crate::objects::create_object_store;
use crate::registry::DocumentRegistry;
use crate::retry::CallBounds;
use crate::sqlite_store::SqliteVectorStore;

/// External collaborators of an [`App`].
pub struct Parts {
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub store: Arc<dyn VectorStore>,
    pub objects: Arc<dyn ObjectStore>,
}

pub struct App {
    pub config: Config,
    pub registry: DocumentRegistry,
    pub ingest: IngestPipeline,
    pub query: QueryPipeline,
    embedding_model: String,
    pool: SqlitePool,
}

impl App {
    /// Open the database, run migrations and build every adapter from `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate(&pool).await?;

        let store: Arc<dyn VectorStore> = match config.storage.vector_store.as_str() {
            "sqlite" => Arc::new(SqliteVectorStore::new(pool.clone())),
            "memory" => Arc::new(InMemoryVectorStore::new()),
            other => bail!("Unknown vector store: {}", other),
        };
        let parts = Parts {
            embedder: create_embedder(&config.embedding)?,
            chat: create_chat_model(&config.completion)?,
            store,
            objects: create_object_store(&config.storage)?,
        };
        Ok(Self::from_parts(config, pool, parts))
    }

    /// Build from explicit collaborators. The pool must already be migrated.
    pub fn from_parts(config: Config, pool: SqlitePool, parts: Parts) -> Self {
        let docs = DocumentRepo::new(pool.clone());
        let locks = Arc::new(DocumentLocks::new());
        let bounds = CallBounds::from_limits(&config.limits);

        let analyzer = if config.ingest.analyze && config.completion.is_enabled() {
            Analyzer::new(
                Some(parts.chat.clone()),
                config.ingest.analyze_chars,
                Duration::from_secs(config.completion.timeout_secs),
            )
        } else {
            Analyzer::heuristic()
        };

        let registry = DocumentRegistry::new(
            docs.clone(),
            parts.store.clone(),
            parts.objects.clone(),
            locks.clone(),
            bounds,
        );
        let ingest = IngestPipeline::new(
            docs,
            parts.embedder.clone(),
            parts.store.clone(),
            parts.objects,
            analyzer,
            locks,
            bounds,
            IngestSettings::from_config(&config),
        );
        let query = QueryPipeline::new(
            parts.embedder.clone(),
            parts.store,
            parts.chat,
            bounds,
            QuerySettings::from_config(&config),
        );

        Self {
            embedding_model: parts.embedder.model_name().to_string(),
            config,
            registry,
            ingest,
            query,
            pool,
        }
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
