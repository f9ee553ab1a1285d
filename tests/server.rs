//! HTTP API tests: the router served on an ephemeral port, driven with reqwest.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use kbchat::app::{App, Parts};
use kbchat::config::Config;
use kbchat::{db, migrate, server};
use kbchat::sqlite_store::SqliteVectorStore;
use kbchat_core::completion::ChatModel;
use kbchat_core::embedding::HashingEmbedder;
use kbchat_core::objects::memory::InMemoryObjectStore;
use kbchat_core::prompt::Prompt;

struct FixedChat;

#[async_trait]
impl ChatModel for FixedChat {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _prompt: &Prompt, _max_tokens: u32) -> Result<String> {
        Ok("Older stock is used first [1].".to_string())
    }
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
    app: Arc<App>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, filename: &str, mime: &str, bytes: Vec<u8>) -> reqwest::Response {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .unwrap();
        self.client
            .post(self.url("/upload"))
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .unwrap()
    }
}

async fn start_server(tweak: impl FnOnce(&mut Config)) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("kb.sqlite"));
    config.limits.retry_base_ms = 1;
    tweak(&mut config);

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    let parts = Parts {
        embedder: Arc::new(HashingEmbedder::new(1024)),
        chat: Arc::new(FixedChat),
        store: Arc::new(SqliteVectorStore::new(pool.clone())),
        objects: Arc::new(InMemoryObjectStore::new()),
    };
    let app = Arc::new(App::from_parts(config, pool, parts));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = app.clone();
    tokio::spawn(async move {
        let _ = server::serve(served, listener).await;
    });

    TestServer {
        _tmp: tmp,
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        app,
    }
}

async fn error_code(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn health_reports_version_and_count() {
    let s = start_server(|_| {}).await;

    let resp = s.client.get(s.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["documents"], 0);
}

#[tokio::test]
async fn document_lifecycle() {
    let s = start_server(|_| {}).await;
    let text = "# Returns Policy\n\nUnopened items may be returned within 30 days.";

    let resp = s.upload("returns.md", "text/markdown", text.as_bytes().to_vec()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let doc: Value = resp.json().await.unwrap();
    let id = doc["id"].as_str().unwrap().to_string();
    assert_eq!(doc["status"], "processed");
    assert_eq!(doc["filename"], "returns.md");
    assert_eq!(doc["derived_metadata"]["title"], "Returns Policy");

    let list: Value = s
        .client
        .get(s.url("/documents"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);
    assert_eq!(list["documents"][0]["id"], id.as_str());

    let detail: Value = s
        .client
        .get(s.url(&format!("/documents/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["document"]["id"], id.as_str());
    assert!(!detail["chunks"].as_array().unwrap().is_empty());

    let resp = s
        .client
        .get(s.url(&format!("/documents/{}/download", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/markdown");
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("returns.md"));
    assert_eq!(resp.bytes().await.unwrap().as_ref(), text.as_bytes());

    let resp = s
        .client
        .patch(s.url(&format!("/documents/{}", id)))
        .json(&json!({ "category": "Policies", "topics": ["returns"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let patched: Value = resp.json().await.unwrap();
    assert_eq!(patched["derived_metadata"]["category"], "Policies");
    assert_eq!(patched["derived_metadata"]["title"], "Returns Policy");

    let resp = s
        .client
        .post(s.url(&format!("/documents/{}/reingest", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = s
        .client
        .delete(s.url(&format!("/documents/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = s
        .client
        .get(s.url(&format!("/documents/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(resp).await, "not_found");
}

#[tokio::test]
async fn upload_errors_map_to_status_codes() {
    let s = start_server(|c| c.ingest.max_file_bytes = 64).await;

    let resp = s.upload("tool.exe", "application/x-msdownload", vec![0x4d, 0x5a]).await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(error_code(resp).await, "unsupported_media_type");

    let resp = s.upload("empty.txt", "text/plain", Vec::new()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "bad_request");

    let resp = s.upload("big.txt", "text/plain", vec![b'a'; 200]).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(resp).await, "payload_too_large");

    let resp = s.upload("bad.pdf", "application/pdf", b"not a pdf".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(resp).await, "extraction_failed");

    let form = Form::new().text("note", "no file here");
    let resp = s
        .client
        .post(s.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(s.app.registry.document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn chat_validation_and_no_context() {
    let s = start_server(|_| {}).await;

    let resp = s
        .client
        .post(s.url("/chat"))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "bad_request");

    let resp = s
        .client
        .post(s.url("/chat"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = s
        .client
        .post(s.url("/chat"))
        .json(&json!({ "message": "What is FIFO?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(resp).await, "no_context");
}

#[tokio::test]
async fn chat_answers_with_citations() {
    let s = start_server(|_| {}).await;
    s.app.ingest.seed_samples().await.unwrap();

    let resp = s
        .client
        .post(s.url("/chat"))
        .json(&json!({
            "message": "How does FIFO keep older stock moving?",
            "history": [
                { "role": "user", "text": "Hi" },
                { "role": "assistant", "text": "Hello, ask me about the warehouse." }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "Older stock is used first [1].");
    assert_eq!(body["model"], "fixed");
    assert_eq!(body["turn"]["role"], "assistant");
    assert_eq!(body["turn"]["text"], "Older stock is used first [1].");

    let citations = body["citations"].as_array().unwrap();
    assert!(!citations.is_empty() && citations.len() <= 3);
    assert_eq!(citations[0]["filename"], "fifo.txt");
    assert_eq!(citations[0]["index"], 1);
}

#[tokio::test]
async fn search_and_stats() {
    let s = start_server(|_| {}).await;
    s.app.ingest.seed_samples().await.unwrap();

    let resp = s
        .client
        .post(s.url("/search"))
        .json(&json!({ "query": "barcode scanning optical readers", "n_results": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["results"][0]["filename"], "barcode-scanning.txt");
    let similarity = body["results"][0]["similarity"].as_f64().unwrap();
    assert!(similarity > 0.0 && similarity <= 100.0);

    let stats: Value = s
        .client
        .get(s.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["documents"], 8);
    assert_eq!(stats["chunks"], 8);
    assert_eq!(stats["embedding_model"], "hashed-1024");

    let report: Value = s
        .client
        .post(s.url("/admin/reconcile"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(report["finished_deletes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_document_routes_are_not_found() {
    let s = start_server(|_| {}).await;

    for path in ["/documents/nope", "/documents/nope/download"] {
        let resp = s.client.get(s.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", path);
    }
    let resp = s
        .client
        .post(s.url("/documents/nope/reingest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = s
        .client
        .delete(s.url("/documents/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
