//! Retrieval-augmented question answering.
//!
//! ```text
//! validate → signature guard → embed question → top-K query → rank
//!          → build grounded prompt → one completion (bounded retry) → answer + citations
//! ```
//!
//! Every failure is typed ([`QueryError`]); nothing here ever produces an
//! answer the chat model did not write. [`QueryPipeline::search`] stops
//! after ranking and backs the viewer's search.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use kbchat_core::completion::{is_not_processed, ChatModel};
use kbchat_core::embedding::Embedder;
use kbchat_core::error::QueryError;
use kbchat_core::models::{ChunkMatch, ConversationTurn};
use kbchat_core::prompt::{build_prompt, PromptBudget};
use kbchat_core::search::{select_top, similarity_percent};
use kbchat_core::store::{check_signature, VectorStore};

use crate::config::Config;
use crate::retry::{retry_if, with_timeout, CallBounds, RetryPolicy};

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub min_score: f32,
    pub max_question_chars: usize,
    pub budget: PromptBudget,
    pub max_tokens: u32,
    pub embed_timeout: Duration,
    pub completion_retry: RetryPolicy,
    pub completion_timeout: Duration,
}

impl QuerySettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            default_top_k: r.top_k,
            max_top_k: r.max_top_k,
            min_score: r.min_score,
            max_question_chars: r.max_question_chars,
            budget: r.budget(),
            max_tokens: config.completion.max_tokens,
            embed_timeout: config.embedding.call_budget(),
            completion_retry: RetryPolicy::new(
                config.completion.max_retries,
                Duration::from_millis(config.limits.retry_base_ms),
            ),
            completion_timeout: Duration::from_secs(config.completion.timeout_secs),
        }
    }
}

/// A source passage that was part of the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// The `[n]` the prompt used for this passage.
    pub index: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub sequence_index: u32,
    pub score: f32,
    pub similarity: f32,
    pub text: String,
}

impl Citation {
    fn from_match(index: usize, m: &ChunkMatch) -> Self {
        Self {
            index,
            chunk_id: m.chunk_id.clone(),
            document_id: m.document_id.clone(),
            filename: m.metadata.filename.clone(),
            title: m.metadata.title.clone(),
            sequence_index: m.sequence_index,
            score: m.score,
            similarity: similarity_percent(m.score),
            text: m.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub model: String,
    /// The best passage was cut to fit the context budget.
    pub context_truncated: bool,
}

pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatModel>,
    bounds: CallBounds,
    settings: QuerySettings,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatModel>,
        bounds: CallBounds,
        settings: QuerySettings,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            bounds,
            settings,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.settings.default_top_k
    }

    /// Answer `question` from the knowledge base.
    pub async fn answer(
        &self,
        question: &str,
        top_k: Option<usize>,
        history: &[ConversationTurn],
    ) -> Result<Answer, QueryError> {
        let matches = self.retrieve(question, top_k).await?;
        if matches.is_empty() {
            return Err(QueryError::NoContext);
        }

        let assembled = build_prompt(question, &matches, history, self.settings.budget);
        if assembled.included.len() < matches.len() {
            tracing::info!(
                retrieved = matches.len(),
                included = assembled.included.len(),
                "context over budget; dropped lowest-similarity chunks"
            );
        }

        let prompt = &assembled.prompt;
        let reply = retry_if(
            self.settings.completion_retry,
            self.settings.completion_timeout,
            "completion",
            is_not_processed,
            || self.chat.complete(prompt, self.settings.max_tokens),
        )
        .await
        .map_err(QueryError::CompletionService)?;

        if reply.trim().is_empty() {
            return Err(QueryError::CompletionService(anyhow::anyhow!(
                "chat model returned an empty reply"
            )));
        }

        let citations = assembled
            .included
            .iter()
            .enumerate()
            .map(|(i, m)| Citation::from_match(i + 1, m))
            .collect();

        tracing::info!(chunks = assembled.included.len(), model = self.chat.model_name(), "answered");
        Ok(Answer {
            answer: reply,
            citations,
            model: self.chat.model_name().to_string(),
            context_truncated: assembled.truncated,
        })
    }

    /// Ranked matches for `query` without generating an answer.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ChunkMatch>, QueryError> {
        self.retrieve(query, top_k).await
    }

    async fn retrieve(
        &self,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ChunkMatch>, QueryError> {
        let top_k = self.validate(question, top_k)?;

        let model = self.embedder.model_name();
        let dims = self.embedder.dims();
        if dims == 0 {
            return Err(QueryError::EmbeddingService(anyhow::anyhow!(
                "embedding provider '{}' is not usable; configure [embedding]",
                model
            )));
        }

        let signature = self
            .bounds
            .store("signature", || self.store.signature())
            .await
            .map_err(QueryError::VectorStore)?;
        check_signature(signature.as_ref(), model, dims).map_err(QueryError::ModelMismatch)?;
        if signature.is_none() {
            // Nothing has ever been stored.
            return Ok(Vec::new());
        }

        let texts = [question.trim().to_string()];
        let vector = with_timeout(self.settings.embed_timeout, "embedding", self.embedder.embed(&texts))
            .await
            .map_err(QueryError::EmbeddingService)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::EmbeddingService(anyhow::anyhow!("embedder returned no vector")))?;

        let matches = self
            .bounds
            .store("query", || self.store.query(&vector, top_k))
            .await
            .map_err(QueryError::VectorStore)?;

        Ok(select_top(matches, top_k, self.settings.min_score))
    }

    fn validate(&self, question: &str, top_k: Option<usize>) -> Result<usize, QueryError> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(QueryError::Validation("question must not be empty".into()));
        }
        let chars = trimmed.chars().count();
        if chars > self.settings.max_question_chars {
            return Err(QueryError::Validation(format!(
                "question is {} characters; the limit is {}",
                chars, self.settings.max_question_chars
            )));
        }
        let top_k = top_k.unwrap_or(self.settings.default_top_k);
        if top_k == 0 || top_k > self.settings.max_top_k {
            return Err(QueryError::Validation(format!(
                "top_k must be between 1 and {}",
                self.settings.max_top_k
            )));
        }
        Ok(top_k)
    }
}
