//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates; secrets (API keys, AWS
//! credentials) are read from the environment by the adapters that need them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kbchat_core::chunk::ChunkParams;
use kbchat_core::prompt::PromptBudget;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Where raw files and vectors live.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `sqlite` (default) or `memory`.
    #[serde(default = "default_vector_store")]
    pub vector_store: String,
    /// `local` (default), `s3` or `memory`.
    #[serde(default = "default_objects")]
    pub objects: String,
    /// Root directory for the `local` object store.
    #[serde(default = "default_objects_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_store: default_vector_store(),
            objects: default_objects(),
            root: default_objects_root(),
            s3: None,
        }
    }
}

fn default_vector_store() -> String {
    "sqlite".to_string()
}
fn default_objects() -> String {
    "local".to_string()
}
fn default_objects_root() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix inside the bucket, e.g. `kbchat/`.
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams::from_tokens(self.max_tokens, self.overlap_tokens)
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_overlap() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Matches scoring below this cosine similarity are ignored.
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            min_score: 0.0,
            max_question_chars: default_max_question_chars(),
            max_context_chars: default_max_context_chars(),
            history_turns: default_history_turns(),
        }
    }
}

impl RetrievalConfig {
    pub fn budget(&self) -> PromptBudget {
        PromptBudget {
            max_context_chars: self.max_context_chars,
            history_turns: self.history_turns,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_top_k() -> usize {
    20
}
fn default_max_question_chars() -> usize {
    4000
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, `ollama` or `hashed`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. OpenAI: `https://api.openai.com/v1`; Ollama: `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Upper bound on one `embed` call, including the provider's own retries.
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries as u64 + 1;
        let backoff: u64 = (0..self.max_retries).map(|a| 1u64 << a.min(5)).sum();
        Duration::from_secs(self.timeout_secs * attempts + backoff)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// `disabled` or `openai` (any OpenAI-compatible chat endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_completion_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            url: None,
            max_tokens: default_completion_max_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_completion_max_tokens() -> u32 {
    500
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Ask the chat model for title / category / topics / summary.
    #[serde(default)]
    pub analyze: bool,
    #[serde(default = "default_analyze_chars")]
    pub analyze_chars: usize,
    /// Globs used by `kbchat ingest <dir>`.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_content_types: default_allowed_content_types(),
            analyze: false,
            analyze_chars: default_analyze_chars(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    25 * 1024 * 1024
}
fn default_allowed_content_types() -> Vec<String> {
    crate::extract::SUPPORTED_CONTENT_TYPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_analyze_chars() -> usize {
    4000
}
fn default_include_globs() -> Vec<String> {
    [
        "**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx", "**/*.pptx", "**/*.xlsx", "**/*.csv",
        "**/*.json", "**/*.html",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Bounds on calls to the vector and object stores.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_object_timeout_secs")]
    pub object_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on each attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: default_store_timeout_secs(),
            object_timeout_secs: default_object_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_store_timeout_secs() -> u64 {
    30
}
fn default_object_timeout_secs() -> u64 {
    60
}
fn default_retry_base_ms() -> u64 {
    1000
}

impl Config {
    /// Defaults with the database at `db_path`. Used by tests and embedders of the library.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            ingest: IngestConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Retrieval
    let r = &config.retrieval;
    if r.max_top_k == 0 {
        bail!("retrieval.max_top_k must be >= 1");
    }
    if r.top_k == 0 || r.top_k > r.max_top_k {
        bail!("retrieval.top_k must be in 1..={}", r.max_top_k);
    }
    if r.max_context_chars == 0 || r.max_question_chars == 0 {
        bail!("retrieval.max_context_chars and retrieval.max_question_chars must be > 0");
    }
    if !(-1.0..=1.0).contains(&r.min_score) {
        bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    // Embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "hashed" => {}
        "openai" | "ollama" => {
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hashed.",
            other
        ),
    }
    if e.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Completion
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.completion.max_tokens == 0 {
        bail!("completion.max_tokens must be > 0");
    }

    // Storage
    match config.storage.vector_store.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown vector store: '{}'. Must be sqlite or memory.",
            other
        ),
    }
    match config.storage.objects.as_str() {
        "local" | "memory" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.objects = \"s3\" requires a [storage.s3] section");
            }
        }
        other => bail!(
            "Unknown object store: '{}'. Must be local, s3, or memory.",
            other
        ),
    }

    // Ingest
    if config.ingest.max_file_bytes == 0 {
        bail!("ingest.max_file_bytes must be > 0");
    }
    if config.ingest.allowed_content_types.is_empty() {
        bail!("ingest.allowed_content_types must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/kbchat.sqlite\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.completion.model, "gpt-3.5-turbo");
        assert_eq!(cfg.completion.max_tokens, 500);
        assert_eq!(cfg.storage.vector_store, "sqlite");
        assert!(!cfg.embedding.is_enabled());
        assert!(cfg
            .ingest
            .allowed_content_types
            .iter()
            .any(|t| t == "application/pdf"));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-ada-002\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let cfg = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-ada-002\"\ndims = 1536\n",
        )
        .unwrap();
        assert_eq!(cfg.embedding.dims, Some(1536));
    }

    #[test]
    fn test_rejects_unknown_backends() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[storage]\nobjects = \"ftp\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[storage]\nobjects = \"s3\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[completion]\nprovider = \"local\"\n").is_err());
    }

    #[test]
    fn test_rejects_bad_chunking_and_retrieval() {
        assert!(parse_config(
            "[db]\npath = \"x\"\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n"
        )
        .is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[retrieval]\ntop_k = 50\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/kbchat.example.toml")).unwrap();
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.embedding.dims, Some(1536));
        assert!(cfg.ingest.analyze);
        assert_eq!(cfg.ingest.exclude_globs, vec!["**/drafts/**".to_string()]);
    }
}
