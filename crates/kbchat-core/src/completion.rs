//! Chat completion trait.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::prompt::Prompt;

/// A hosted chat model that turns a prompt into one reply.
///
/// Implementations must not retry on their own: whether a failed call may
/// be repeated depends on whether the provider could have processed it,
/// and the caller decides that.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &Prompt, max_tokens: u32) -> Result<String>;
}

/// A completion failure the provider definitely did not act on
/// (connection refused, HTTP 429, HTTP 503). Only these are retried.
#[derive(Error, Debug)]
#[error("request not processed: {0}")]
pub struct NotProcessed(pub String);

/// True when `err` (or anything in its chain) is a [`NotProcessed`].
pub fn is_not_processed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<NotProcessed>())
}
