use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionProvider, LlmError};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Tried in order; a 429 moves on to the next key.
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: "gpt-4o".into(),
            api_base: DEFAULT_API_BASE.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| LlmError::Client(err.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn has_keys(&self) -> bool {
        !self.config.api_keys.is_empty()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        if self.config.api_keys.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let url = self.endpoint();
        let body = ChatCompletionRequest {
            model: &self.config.model,
            max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error = None;
        for (index, key) in self.config.api_keys.iter().enumerate() {
            let response = match self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    last_error = Some(LlmError::Transport(err.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let friendly = rate_limit_message(&text);
                    let remaining = self.config.api_keys.len() - index - 1;
                    warn!(
                        target: "openai",
                        message = %friendly,
                        attempt = index + 1,
                        remaining,
                        "OpenAI rate limited suggestion request"
                    );
                    last_error = Some(LlmError::RateLimited(friendly));
                    if remaining > 0 {
                        continue;
                    }
                    break;
                }
                return Err(LlmError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let response: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
            if let Some(usage) = &response.usage {
                debug!(
                    target: "openai",
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "completion usage"
                );
            }

            return response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
                .and_then(ChatCompletionContent::as_text)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or(LlmError::EmptyContent);
        }

        Err(last_error.unwrap_or(LlmError::MissingApiKey))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<ChatCompletionContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                (!text.is_empty()).then_some(text)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorMessage {
    message: Option<String>,
}

fn rate_limit_message(raw: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<OpenAiErrorEnvelope>(raw) {
        if let Some(message) = envelope.error.message {
            return format!("OpenAI rate limit exceeded: {}", message.trim());
        }
    }
    "OpenAI rate limit exceeded; please retry later or reduce usage.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_prefers_api_text() {
        let raw = r#"{"error":{"message":" Rate limit reached for gpt-4o ","type":"requests"}}"#;
        assert_eq!(
            rate_limit_message(raw),
            "OpenAI rate limit exceeded: Rate limit reached for gpt-4o"
        );
        assert!(rate_limit_message("<html>").contains("retry later"));
    }

    #[test]
    fn content_parts_are_joined() {
        let content: ChatCompletionContent =
            serde_json::from_str(r#"[{"type":"text","text":"Add alt"},{"type":"text","text":"text."}]"#)
                .unwrap();
        assert_eq!(content.as_text().as_deref(), Some("Add alt\ntext."));
    }

    #[tokio::test]
    async fn no_keys_fails_without_network() {
        let provider = OpenAiProvider::new(OpenAiConfig::default()).unwrap();
        assert!(!provider.has_keys());
        let err = provider.complete("prompt", 10).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }
}
