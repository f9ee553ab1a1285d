//! Document analysis: title, category, topics and summary.
//!
//! With a chat model configured and `ingest.analyze = true`, the model is
//! asked for a JSON object describing the start of the document. Anything
//! that goes wrong falls back to [`heuristic_metadata`]; analysis never
//! fails an ingestion.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use kbchat_core::completion::ChatModel;
use kbchat_core::models::DerivedMetadata;
use kbchat_core::prompt::{Prompt, PromptMessage, PromptRole};

const MAX_TITLE_CHARS: usize = 80;
const MAX_TOPICS: usize = 8;
const ANALYSIS_MAX_TOKENS: u32 = 300;

const ANALYSIS_INSTRUCTION: &str = "You classify documents for a company knowledge base. \
Reply with a single JSON object and nothing else, using the keys \
\"title\" (string), \"category\" (string), \"topics\" (array of short strings) \
and \"summary\" (one or two sentences).";

pub struct Analyzer {
    chat: Option<Arc<dyn ChatModel>>,
    sample_chars: usize,
    timeout: Duration,
}

#[derive(Deserialize)]
struct AnalysisReply {
    title: Option<String>,
    category: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    summary: Option<String>,
}

impl Analyzer {
    /// `chat = None` gives heuristics only.
    pub fn new(chat: Option<Arc<dyn ChatModel>>, sample_chars: usize, timeout: Duration) -> Self {
        Self {
            chat,
            sample_chars,
            timeout,
        }
    }

    pub fn heuristic() -> Self {
        Self::new(None, 0, Duration::ZERO)
    }

    pub async fn analyze(&self, filename: &str, text: &str) -> DerivedMetadata {
        let fallback = heuristic_metadata(filename, text);
        let Some(chat) = &self.chat else {
            return fallback;
        };

        let sample = truncate_chars(text, self.sample_chars);
        let prompt = Prompt {
            messages: vec![
                PromptMessage {
                    role: PromptRole::System,
                    content: ANALYSIS_INSTRUCTION.to_string(),
                },
                PromptMessage {
                    role: PromptRole::User,
                    content: format!("Filename: {}\n\n{}", filename, sample),
                },
            ],
        };

        let reply = match tokio::time::timeout(self.timeout, chat.complete(&prompt, ANALYSIS_MAX_TOKENS)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(filename, error = %e, "document analysis failed; using heuristics");
                return fallback;
            }
            Err(_) => {
                tracing::warn!(filename, "document analysis timed out; using heuristics");
                return fallback;
            }
        };

        match parse_analysis(&reply) {
            Some(parsed) => merge(parsed, fallback),
            None => {
                tracing::warn!(filename, "analysis reply was not valid JSON; using heuristics");
                fallback
            }
        }
    }
}

/// Parse the model's reply, tolerating a surrounding Markdown code fence.
fn parse_analysis(reply: &str) -> Option<DerivedMetadata> {
    let trimmed = reply.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => return None,
    };
    let parsed: AnalysisReply = serde_json::from_str(body).ok()?;

    let clean = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Some(DerivedMetadata {
        title: clean(parsed.title).map(|t| truncate_chars(&t, MAX_TITLE_CHARS).to_string()),
        category: clean(parsed.category),
        topics: parsed
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(MAX_TOPICS)
            .collect(),
        summary: clean(parsed.summary),
    })
}

fn merge(parsed: DerivedMetadata, fallback: DerivedMetadata) -> DerivedMetadata {
    DerivedMetadata {
        title: parsed.title.or(fallback.title),
        category: parsed.category.or(fallback.category),
        topics: parsed.topics,
        summary: parsed.summary.or(fallback.summary),
    }
}

/// Title from the first non-empty line (Markdown heading marks removed),
/// else the filename without its extension. No category.
pub fn heuristic_metadata(filename: &str, text: &str) -> DerivedMetadata {
    let first_line = text
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty());

    let title = match first_line {
        Some(line) => truncate_chars(line, MAX_TITLE_CHARS).to_string(),
        None => filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename)
            .to_string(),
    };

    DerivedMetadata {
        title: Some(title),
        ..Default::default()
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl ChatModel for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, _prompt: &Prompt, _max_tokens: u32) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl ChatModel for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn complete(&self, _prompt: &Prompt, _max_tokens: u32) -> Result<String> {
            bail!("HTTP 500")
        }
    }

    fn analyzer(chat: Arc<dyn ChatModel>) -> Analyzer {
        Analyzer::new(Some(chat), 4000, Duration::from_secs(5))
    }

    #[test]
    fn test_heuristic_title() {
        let meta = heuristic_metadata("abc.md", "\n\n# Cross-Docking\nProducts move directly.");
        assert_eq!(meta.title.as_deref(), Some("Cross-Docking"));
        assert_eq!(meta.category, None);

        let meta = heuristic_metadata("notes.txt", "   ");
        assert_eq!(meta.title.as_deref(), Some("notes"));

        let long = "x".repeat(200);
        assert_eq!(heuristic_metadata("a", &long).title.unwrap().len(), MAX_TITLE_CHARS);
    }

    #[tokio::test]
    async fn test_model_reply_in_code_fence() {
        let reply = "```json\n{\"title\": \"ABC Analysis\", \"category\": \"Inventory\", \
                     \"topics\": [\"classification\", \" \"], \"summary\": \"Ranks items by value.\"}\n```";
        let meta = analyzer(Arc::new(Canned(reply)))
            .analyze("abc.txt", "ABC analysis ranks inventory.")
            .await;
        assert_eq!(meta.title.as_deref(), Some("ABC Analysis"));
        assert_eq!(meta.category.as_deref(), Some("Inventory"));
        assert_eq!(meta.topics, vec!["classification"]);
        assert_eq!(meta.summary.as_deref(), Some("Ranks items by value."));
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_heuristics() {
        let text = "Just-In-Time inventory\nreceives goods only as needed.";
        for chat in [
            Arc::new(Broken) as Arc<dyn ChatModel>,
            Arc::new(Canned("I think this is about inventory.")),
        ] {
            let meta = analyzer(chat).analyze("jit.txt", text).await;
            assert_eq!(meta.title.as_deref(), Some("Just-In-Time inventory"));
            assert_eq!(meta.category, None);
        }
    }
}
