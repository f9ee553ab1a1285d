//! Grounded prompt assembly.
//!
//! Builds the message list sent to the chat model: a system instruction
//! that restricts the model to the supplied context, the retrieved chunks
//! as numbered, delimited context blocks, a window of recent conversation
//! turns, and the question.
//!
//! The context block is bounded by [`PromptBudget::max_context_chars`].
//! When the retrieved chunks do not fit, the lowest-similarity chunks are
//! dropped first; if the best chunk alone is too large it is truncated.

use serde::Serialize;

use crate::models::{ChunkMatch, ConversationTurn, Role};

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant for a company knowledge base. \
Answer the user's question using only the information in the provided context. \
If the answer is not contained in the context, say politely that you don't have that information. \
Refer to sources by their [n] number when you use them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// An ordered list of chat messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// Every message joined into one string, for single-prompt backends and logs.
    pub fn flatten(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBudget {
    pub max_context_chars: usize,
    pub history_turns: usize,
}

/// A prompt plus the chunks that made it into its context, in prompt order.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: Prompt,
    pub included: Vec<ChunkMatch>,
    pub truncated: bool,
}

/// Context block header for the `n`th (1-based) chunk.
pub fn context_header(n: usize, m: &ChunkMatch) -> String {
    format!("--- [{}] {} (chunk {}) ---\n", n, m.metadata.filename, m.sequence_index)
}

/// Build a prompt from ranked matches (best first), recent history and the question.
pub fn build_prompt(
    question: &str,
    matches: &[ChunkMatch],
    history: &[ConversationTurn],
    budget: PromptBudget,
) -> AssembledPrompt {
    let (context, included, truncated) = fit_context(matches, budget.max_context_chars);

    let mut messages = vec![PromptMessage {
        role: PromptRole::System,
        content: SYSTEM_INSTRUCTION.to_string(),
    }];

    let skip = history.len().saturating_sub(budget.history_turns);
    for turn in &history[skip..] {
        messages.push(PromptMessage {
            role: match turn.role {
                Role::User => PromptRole::User,
                Role::Assistant => PromptRole::Assistant,
            },
            content: turn.text.clone(),
        });
    }

    messages.push(PromptMessage {
        role: PromptRole::User,
        content: format!("Context:\n{}\nQuestion: {}", context, question.trim()),
    });

    AssembledPrompt {
        prompt: Prompt { messages },
        included,
        truncated,
    }
}

fn fit_context(matches: &[ChunkMatch], max_chars: usize) -> (String, Vec<ChunkMatch>, bool) {
    let block_len = |i: usize, m: &ChunkMatch| context_header(i + 1, m).len() + m.text.len() + 1;

    let mut keep = matches.len();
    let mut total: usize = matches.iter().enumerate().map(|(i, m)| block_len(i, m)).sum();
    while keep > 1 && total > max_chars {
        keep -= 1;
        total -= block_len(keep, &matches[keep]);
    }

    let mut included: Vec<ChunkMatch> = matches[..keep].to_vec();
    let mut truncated = false;

    if let Some(best) = included.first_mut() {
        if keep == 1 && total > max_chars {
            let header = context_header(1, best).len() + 1;
            let room = max_chars.saturating_sub(header);
            let mut cut = room.min(best.text.len());
            while !best.text.is_char_boundary(cut) {
                cut -= 1;
            }
            best.text.truncate(cut);
            truncated = true;
        }
    }

    let mut context = String::new();
    for (i, m) in included.iter().enumerate() {
        context.push_str(&context_header(i + 1, m));
        context.push_str(&m.text);
        context.push('\n');
    }

    (context, included, truncated)
}
