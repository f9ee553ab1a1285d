//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version and document count |
//! | `POST`   | `/upload` | Multipart `file` upload → document (201) |
//! | `POST`   | `/chat` | Grounded answer with citations |
//! | `POST`   | `/search` | Ranked chunk matches, no generation |
//! | `GET`    | `/documents` | Document list, newest first |
//! | `GET`    | `/documents/{id}` | Document with its chunks |
//! | `PATCH`  | `/documents/{id}` | Edit title / category / topics / summary |
//! | `DELETE` | `/documents/{id}` | Delete document, chunks and raw file (204) |
//! | `GET`    | `/documents/{id}/download` | Raw file |
//! | `POST`   | `/documents/{id}/reingest` | Re-run ingestion from the stored file |
//! | `GET`    | `/stats` | Knowledge-base statistics |
//! | `POST`   | `/admin/reconcile` | Repair interrupted deletes and orphans |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `model_mismatch` | 409 |
//! | `payload_too_large` | 413 |
//! | `unsupported_media_type` | 415 |
//! | `extraction_failed`, `no_context` | 422 |
//! | `internal` | 500 |
//! | `partial_ingestion`, `embedding_service`, `vector_store`, `completion_service`, `object_store` | 502 |
//!
//! # CORS
//!
//! All origins, methods and headers are permitted so the chat UI and the
//! viewer can be served from anywhere.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kbchat_core::error::{IngestError, QueryError, RegistryError};
use kbchat_core::models::{Chunk, ChunkMatch, ConversationTurn, Document, DocumentSummary, MetadataPatch};
use kbchat_core::search::similarity_percent;

use crate::answer::Citation;
use crate::app::App;
use crate::ingest::Upload;

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Bind to `[server].bind` and serve until the process is stopped.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("kbchat listening on http://{}", listener.local_addr()?);
    serve(app, listener).await
}

/// Serve on an already-bound listener (tests bind `127.0.0.1:0`).
pub async fn serve(app: Arc<App>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub fn router(app: Arc<App>) -> Router {
    let body_limit = app.config.ingest.max_file_bytes as usize + MULTIPART_OVERHEAD;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document)
                .patch(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/documents/{id}/download", get(handle_download))
        .route("/documents/{id}/reingest", post(handle_reingest))
        .route("/stats", get(handle_stats))
        .route("/admin/reconcile", post(handle_reconcile))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn upstream(code: &'static str, message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_GATEWAY, code, message)
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::Validation(_) => bad_request(message),
            IngestError::UnsupportedType(_) => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                message,
            ),
            IngestError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
            }
            IngestError::ExtractionFailed(_) => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_failed",
                message,
            ),
            IngestError::ModelMismatch(_) => {
                AppError::new(StatusCode::CONFLICT, "model_mismatch", message)
            }
            IngestError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            IngestError::PartialIngestion { .. } => upstream("partial_ingestion", message),
            IngestError::EmbeddingService(_) => upstream("embedding_service", message),
            IngestError::VectorStore(_) => upstream("vector_store", message),
            IngestError::ObjectStore(_) => upstream("object_store", message),
            IngestError::Internal(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::Validation(_) => bad_request(message),
            QueryError::ModelMismatch(_) => {
                AppError::new(StatusCode::CONFLICT, "model_mismatch", message)
            }
            QueryError::NoContext => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "no_context", message)
            }
            QueryError::EmbeddingService(_) => upstream("embedding_service", message),
            QueryError::VectorStore(_) => upstream("vector_store", message),
            QueryError::CompletionService(_) => upstream("completion_service", message),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::NotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            RegistryError::ObjectStore(_) => upstream("object_store", message),
            RegistryError::VectorStore(_) => upstream("vector_store", message),
            RegistryError::Database(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: u64,
}

async fn handle_health(State(app): State<Arc<App>>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents: app.registry.document_count().await?,
    }))
}

// ============ POST /upload ============

async fn handle_upload(
    State(app): State<Arc<App>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let mut upload = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some(Upload {
            bytes: bytes.to_vec(),
            filename,
            content_type,
        });
        break;
    }

    let upload = upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;
    let doc = app.ingest.ingest(upload).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.body_text())
    } else {
        bad_request(err.body_text())
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    top_k: Option<usize>,
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    citations: Vec<Citation>,
    model: String,
    turn: ConversationTurn,
}

async fn handle_chat(
    State(app): State<Arc<App>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;
    let answer = app.query.answer(&req.message, req.top_k, &req.history).await?;
    Ok(Json(ChatResponse {
        turn: ConversationTurn::assistant(answer.answer.clone()),
        response: answer.answer,
        citations: answer.citations,
        model: answer.model,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    n_results: Option<usize>,
}

#[derive(Serialize)]
struct SearchHit {
    chunk_id: String,
    document_id: String,
    filename: String,
    title: Option<String>,
    category: Option<String>,
    sequence_index: u32,
    score: f32,
    similarity: f32,
    text: String,
}

impl From<ChunkMatch> for SearchHit {
    fn from(m: ChunkMatch) -> Self {
        Self {
            similarity: similarity_percent(m.score),
            chunk_id: m.chunk_id,
            document_id: m.document_id,
            filename: m.metadata.filename,
            title: m.metadata.title,
            category: m.metadata.category,
            sequence_index: m.sequence_index,
            score: m.score,
            text: m.text,
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    total: usize,
}

async fn handle_search(
    State(app): State<Arc<App>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let matches = app.query.search(&req.query, req.n_results).await?;
    let results: Vec<SearchHit> = matches.into_iter().map(SearchHit::from).collect();
    Ok(Json(SearchResponse {
        total: results.len(),
        results,
    }))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentSummary>,
    total: usize,
}

async fn handle_list_documents(
    State(app): State<Arc<App>>,
) -> Result<Json<DocumentList>, AppError> {
    let documents = app.registry.list().await?;
    Ok(Json(DocumentList {
        total: documents.len(),
        documents,
    }))
}

#[derive(Serialize)]
struct DocumentDetail {
    document: Document,
    chunks: Vec<Chunk>,
}

async fn handle_get_document(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetail>, AppError> {
    let document = app.registry.get(&id).await?;
    let chunks = app.registry.get_chunks(&id).await?;
    Ok(Json(DocumentDetail { document, chunks }))
}

async fn handle_update_document(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    body: Result<Json<MetadataPatch>, JsonRejection>,
) -> Result<Json<Document>, AppError> {
    let Json(patch) = body?;
    Ok(Json(app.registry.update_metadata(&id, patch).await?))
}

async fn handle_delete_document(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    app.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_download(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let download = app.registry.download(&id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.filename.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response())
}

async fn handle_reingest(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(app.ingest.reingest(&id).await?))
}

// ============ Viewer / admin ============

async fn handle_stats(
    State(app): State<Arc<App>>,
) -> Result<Json<crate::registry::Stats>, AppError> {
    Ok(Json(app.registry.stats().await?))
}

async fn handle_reconcile(
    State(app): State<Arc<App>>,
) -> Result<Json<crate::registry::ReconcileReport>, AppError> {
    Ok(Json(app.registry.reconcile().await?))
}
