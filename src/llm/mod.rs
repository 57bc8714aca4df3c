//! Language-model client used for remediation suggestions.

pub mod openai;
mod prompt;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{OpenAiConfig, OpenAiProvider};
pub use prompt::fix_prompt;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no OpenAI API key configured")]
    MissingApiKey,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("openai request failed: {0}")]
    Transport(String),
    #[error("openai returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    RateLimited(String),
    #[error("openai response invalid: {0}")]
    InvalidResponse(String),
    #[error("openai response missing content")]
    EmptyContent,
}

/// Single-prompt text completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;
}
