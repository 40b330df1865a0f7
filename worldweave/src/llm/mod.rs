//! LLM layer: provider abstraction, two-tier response cache, and the gateway
//! every model call in the engine goes through.
//!
//! The gateway owns caching, retry with backoff, deterministic seed
//! derivation, the global concurrency semaphore, and the append-only call
//! audit. Providers implement [`LlmProvider`]; the engine ships
//! [`MockProvider`] for tests and [`OpenAiProvider`] for OpenAI-compatible
//! APIs.

pub mod cache;
pub mod gateway;
pub mod mock;
pub mod openai;

pub use cache::{DurableCache, InMemoryLlmCache, SqliteLlmCache, TwoTierCache};
pub use gateway::{derive_seed, estimate_cost, LlmGateway, RetryPolicy};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// LLM failure kinds. Everything except `Fatal` and `Cache` is transient and
/// retried by the gateway; rate limits back off longer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("llm timeout: {0}")]
    Timeout(String),
    #[error("llm rate limit: {0}")]
    RateLimit(String),
    #[error("llm network error: {0}")]
    Network(String),
    #[error("llm provider error: {0}")]
    Provider(String),
    #[error("llm fatal error: {0}")]
    Fatal(String),
    #[error("llm cache error: {0}")]
    Cache(String),
}

impl LlmError {
    /// Whether the gateway should retry after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::Fatal(_) | LlmError::Cache(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimit(_))
    }
}

/// One chat message sent to a provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Raw provider response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderReply {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Minimal provider interface. Implementations must not hard-code a single
/// vendor; the gateway treats them uniformly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
        seed: Option<u32>,
    ) -> Result<ProviderReply, LlmError>;

    /// Short provider name for audit records.
    fn name(&self) -> &str;
}

/// One gateway completion, resolved from cache or a live call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmCompletion {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub model: String,
    pub cached: bool,
}

impl LlmCompletion {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Request to [`LlmGateway::complete`].
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub use_cache: bool,
    pub seed: Option<u32>,
    pub agent_id: Option<String>,
    pub step: Option<u64>,
    pub extras: Map<String, Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            temperature: 0.7,
            max_tokens: 1000,
            system_prompt: None,
            use_cache: true,
            seed: None,
            agent_id: None,
            step: None,
            extras: Map::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn attributed(mut self, agent_id: impl Into<String>, step: u64) -> Self {
        self.agent_id = Some(agent_id.into());
        self.step = Some(step);
        self
    }

    /// The message list this request resolves to.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Append-only audit entry: one per attempt outcome (cached, success, or
/// exhausted failure).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub seed: Option<u32>,
    pub extras: Map<String, Value>,
    pub response_content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    pub agent_id: Option<String>,
    pub simulation_id: Option<String>,
    pub step: Option<u64>,
    pub cached: bool,
    pub error: Option<String>,
    pub retries: u32,
}
