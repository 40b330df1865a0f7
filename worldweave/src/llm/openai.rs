//! OpenAI-compatible provider.
//!
//! Uses the Chat Completions API via `async_openai`. Requires
//! `OPENAI_API_KEY` (or an explicit config, e.g. for a custom base URL).
//! Error strings are classified into the gateway's transient/fatal taxonomy
//! so retry behavior matches the provider's actual failure modes.

use async_trait::async_trait;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};

use crate::llm::{ChatMessage, LlmError, LlmProvider, ProviderReply};

/// Chat Completions client implementing [`LlmProvider`].
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// API key from the `OPENAI_API_KEY` environment variable.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Loads `.env` first (development convenience), then reads the standard
    /// environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::new()
    }

    /// Custom config (api key, base URL) for OpenAI-compatible endpoints.
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }

    fn to_request_messages(messages: &[ChatMessage]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role.as_str() {
                "system" => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(m.content.as_str()),
                ),
                _ => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                    m.content.as_str(),
                )),
            })
            .collect()
    }

    fn classify(error_text: String) -> LlmError {
        let lower = error_text.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            LlmError::Timeout(error_text)
        } else if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
        {
            LlmError::RateLimit(error_text)
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("invalid api key")
            || lower.contains("authentication")
        {
            LlmError::Fatal(error_text)
        } else if lower.contains("connection")
            || lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("network")
        {
            LlmError::Network(error_text)
        } else {
            LlmError::Provider(error_text)
        }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
        seed: Option<u32>,
    ) -> Result<ProviderReply, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model.to_string());
        args.messages(Self::to_request_messages(messages));
        args.temperature(temperature as f32);
        args.max_tokens(max_tokens);
        if let Some(seed) = seed {
            args.seed(seed as i64);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Fatal(format!("request build failed: {}", e)))?;

        tracing::debug!(model, message_count = messages.len(), "openai chat create");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| Self::classify(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("no choices in response".into()))?;
        let content = choice.message.content.unwrap_or_default();
        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(ProviderReply {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: error strings classify into the retry taxonomy.
    #[test]
    fn error_classification() {
        assert!(matches!(
            OpenAiProvider::classify("429 Too Many Requests".into()),
            LlmError::RateLimit(_)
        ));
        assert!(matches!(
            OpenAiProvider::classify("request timed out".into()),
            LlmError::Timeout(_)
        ));
        assert!(matches!(
            OpenAiProvider::classify("401 Unauthorized".into()),
            LlmError::Fatal(_)
        ));
        assert!(matches!(
            OpenAiProvider::classify("connection refused".into()),
            LlmError::Network(_)
        ));
        assert!(matches!(
            OpenAiProvider::classify("model overloaded".into()),
            LlmError::Provider(_)
        ));
    }

    /// **Scenario**: invoke against an unreachable base returns an error
    /// (no real API key needed).
    #[tokio::test]
    async fn unreachable_base_returns_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("http://127.0.0.1:1");
        let provider = OpenAiProvider::with_config(config);
        let result = provider
            .complete("gpt-4o-mini", &[ChatMessage::user("hi")], 0.7, 16, None)
            .await;
        assert!(result.is_err());
    }
}
