//! Chat completion providers.
//!
//! - **[`DisabledChatModel`]** fails every call; used when no provider is configured.
//! - **[`OpenAIChatModel`]** posts to `{url}/chat/completions` on the OpenAI API
//!   or any compatible server (LM Studio, vLLM, Ollama's `/v1`).
//!
//! Providers never retry. They tag failures the server certainly did not
//! act on with [`NotProcessed`] so the query pipeline can decide.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use kbchat_core::completion::{ChatModel, NotProcessed};
use kbchat_core::prompt::Prompt;

use crate::config::CompletionConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Build the configured chat model.
pub fn create_chat_model(config: &CompletionConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &Prompt, _max_tokens: u32) -> Result<String> {
        bail!("Completion provider is disabled; set [completion].provider in the config")
    }
}

/// OpenAI-compatible chat completions. The API key comes from
/// `OPENAI_API_KEY` and may be absent for local servers.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    api_key: Option<String>,
}

impl OpenAIChatModel {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .context("Failed to create HTTP client")?;

        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() && config.url.is_none() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            client,
            endpoint: chat_endpoint(base),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

/// Resolve the chat completions endpoint from a base URL.
fn chat_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt, max_tokens: u32) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages,
            "max_tokens": max_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                return Err(NotProcessed(format!("cannot reach {}: {}", self.endpoint, e)).into())
            }
            Err(e) => return Err(anyhow!("chat request failed: {}", e)),
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read completion response")?;

        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(NotProcessed(format!("HTTP {}: {}", status, text)).into());
        }
        if !status.is_success() {
            bail!("chat API error {}: {}", status, text);
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse completion JSON")?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`. An empty reply is an error.
pub fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(str::trim)
        .unwrap_or("");

    if content.is_empty() {
        bail!("chat model returned an empty reply");
    }
    Ok(content.to_string())
}
