//! LLM gateway: the single entry point for every model call.
//!
//! Responsibilities: cache lookup keyed by the canonical request, retry with
//! exponential backoff (longer for rate limits, none for fatal errors),
//! deterministic per-call seed derivation from the master seed, the global
//! concurrency semaphore, and the append-only call audit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::llm::cache::{CachedReply, TwoTierCache};
use crate::llm::{
    ChatMessage, CompletionRequest, LlmCallRecord, LlmCompletion, LlmError, LlmProvider,
};

/// Retry shape: `delay = base * multiplier^attempt`; rate limits use
/// `multiplier^(attempt+1)` for a longer wait on the same base.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = if rate_limited { attempt + 1 } else { attempt };
        let factor = self.multiplier.powi(exponent as i32);
        self.base_delay.mul_f64(factor)
    }
}

/// Rough cost attribution per 1k tokens, keyed by model name fragments.
/// Unknown models use the small-model rate.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let (input_rate, output_rate) = if model.contains("gpt-4o-mini") {
        (0.000_15, 0.000_6)
    } else if model.contains("gpt-4") {
        (0.005, 0.015)
    } else if model.contains("claude") && model.contains("haiku") {
        (0.000_25, 0.001_25)
    } else if model.contains("claude") {
        (0.003, 0.015)
    } else {
        (0.000_15, 0.000_6)
    };
    (prompt_tokens as f64 / 1000.0) * input_rate
        + (completion_tokens as f64 / 1000.0) * output_rate
}

/// Derives the per-call seed: `sha256(master_seed, step, agent_id) mod 2^32`.
pub fn derive_seed(master_seed: u64, step: u64, agent_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(master_seed.to_be_bytes());
    hasher.update(step.to_be_bytes());
    hasher.update(agent_id.as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Gateway statistics snapshot.
#[derive(Clone, Debug, Default)]
pub struct GatewayStats {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub calls: usize,
    pub cache_hit_rate: f64,
}

/// The single entry point for model calls.
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    cache: TwoTierCache,
    retry: RetryPolicy,
    default_model: String,
    call_timeout: Duration,
    master_seed: Option<u64>,
    simulation_id: Option<String>,
    semaphore: Arc<Semaphore>,
    records: Mutex<Vec<LlmCallRecord>>,
    total_tokens: AtomicU64,
    total_cost_micros: AtomicU64,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            cache: TwoTierCache::new(Duration::from_secs(3600), 1000),
            retry: RetryPolicy::default(),
            default_model: default_model.into(),
            call_timeout: Duration::from_secs(60),
            master_seed: None,
            simulation_id: None,
            semaphore: Arc::new(Semaphore::new(10)),
            records: Mutex::new(Vec::new()),
            total_tokens: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: TwoTierCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_master_seed(mut self, master_seed: u64) -> Self {
        self.master_seed = Some(master_seed);
        self
    }

    pub fn with_simulation_id(mut self, simulation_id: impl Into<String>) -> Self {
        self.simulation_id = Some(simulation_id.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Caps concurrent in-flight provider calls across all agents.
    pub fn with_max_concurrent_calls(mut self, max_calls: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max_calls.max(1)));
        self
    }

    /// Cache key: first 16 hex chars of SHA-256 over the canonical request.
    fn cache_key(messages: &[ChatMessage], model: &str, temperature: f64, seed: Option<u32>) -> String {
        let canonical = json!({
            "messages": messages,
            "model": model,
            "temperature": temperature,
            "seed": seed,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..16].to_string()
    }

    fn resolve_seed(&self, request: &CompletionRequest) -> Option<u32> {
        request.seed.or_else(|| {
            self.master_seed.map(|master| {
                derive_seed(
                    master,
                    request.step.unwrap_or(0),
                    request.agent_id.as_deref().unwrap_or(""),
                )
            })
        })
    }

    /// Generates a completion, consulting the cache first.
    pub async fn complete(&self, request: CompletionRequest) -> Result<LlmCompletion, LlmError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let messages = request.messages();
        let seed = self.resolve_seed(&request);
        let key = Self::cache_key(&messages, &model, request.temperature, seed);

        if request.use_cache {
            if let Some(cached) = self.cache.get(&key).await {
                self.append_record(&request, &model, &messages, seed, |record| {
                    record.cached = true;
                    record.response_content = cached.content.clone();
                    record.prompt_tokens = cached.prompt_tokens;
                    record.completion_tokens = cached.completion_tokens;
                });
                return Ok(LlmCompletion {
                    content: cached.content,
                    prompt_tokens: cached.prompt_tokens,
                    completion_tokens: cached.completion_tokens,
                    cost: 0.0,
                    model,
                    cached: true,
                });
            }
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Fatal("gateway semaphore closed".into()))?;

        let started = std::time::Instant::now();
        let mut retries = 0;

        let outcome = loop {
            let attempt_result = tokio::time::timeout(
                self.call_timeout,
                self.provider.complete(
                    &model,
                    &messages,
                    request.temperature,
                    request.max_tokens,
                    seed,
                ),
            )
            .await;

            let error = match attempt_result {
                Ok(Ok(reply)) => break Ok(reply),
                Ok(Err(error)) => error,
                Err(_) => LlmError::Timeout(format!(
                    "provider call exceeded {:?}",
                    self.call_timeout
                )),
            };

            if !error.is_transient() || retries >= self.retry.max_retries {
                break Err(error);
            }

            let delay = self.retry.delay(retries, error.is_rate_limit());
            tracing::warn!(
                attempt = retries + 1,
                max = self.retry.max_retries,
                wait_ms = delay.as_millis() as u64,
                error = %error,
                "llm transient error, retrying"
            );
            retries += 1;
            tokio::time::sleep(delay).await;
        };

        let latency_ms = started.elapsed().as_millis() as u64;

        let reply = match outcome {
            Ok(reply) => reply,
            Err(error) => {
                self.append_record(&request, &model, &messages, seed, |record| {
                    record.error = Some(error.to_string());
                    record.retries = retries;
                    record.latency_ms = latency_ms;
                });
                return Err(error);
            }
        };

        let cost = estimate_cost(&model, reply.prompt_tokens, reply.completion_tokens);
        self.total_tokens.fetch_add(
            (reply.prompt_tokens + reply.completion_tokens) as u64,
            Ordering::Relaxed,
        );
        self.total_cost_micros
            .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);

        self.append_record(&request, &model, &messages, seed, |record| {
            record.response_content = reply.content.clone();
            record.prompt_tokens = reply.prompt_tokens;
            record.completion_tokens = reply.completion_tokens;
            record.latency_ms = latency_ms;
            record.retries = retries;
        });

        if request.use_cache {
            self.cache
                .set(
                    &key,
                    CachedReply {
                        content: reply.content.clone(),
                        prompt_tokens: reply.prompt_tokens,
                        completion_tokens: reply.completion_tokens,
                        model: model.clone(),
                    },
                )
                .await;
        }

        Ok(LlmCompletion {
            content: reply.content,
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
            cost,
            model,
            cached: false,
        })
    }

    fn append_record(
        &self,
        request: &CompletionRequest,
        model: &str,
        messages: &[ChatMessage],
        seed: Option<u32>,
        fill: impl FnOnce(&mut LlmCallRecord),
    ) {
        let mut record = LlmCallRecord {
            id: uuid::Uuid::new_v4().to_string()[..12].to_string(),
            timestamp: chrono::Utc::now(),
            provider: self.provider.name().to_string(),
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: request.temperature,
            seed,
            extras: request.extras.clone(),
            response_content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms: 0,
            agent_id: request.agent_id.clone(),
            simulation_id: self.simulation_id.clone(),
            step: request.step,
            cached: false,
            error: None,
            retries: 0,
        };
        fill(&mut record);
        self.records.lock().expect("llm records poisoned").push(record);
    }

    pub fn call_history(&self) -> Vec<LlmCallRecord> {
        self.records.lock().expect("llm records poisoned").clone()
    }

    pub fn calls_for_agent(&self, agent_id: &str) -> Vec<LlmCallRecord> {
        self.call_history()
            .into_iter()
            .filter(|record| record.agent_id.as_deref() == Some(agent_id))
            .collect()
    }

    pub fn calls_for_step(&self, step: u64) -> Vec<LlmCallRecord> {
        self.call_history()
            .into_iter()
            .filter(|record| record.step == Some(step))
            .collect()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_cost: self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            calls: self.records.lock().expect("llm records poisoned").len(),
            cache_hit_rate: self.cache.memory().hit_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;

    fn gateway_with(provider: MockProvider) -> LlmGateway {
        LlmGateway::new(Arc::new(provider), "mock-model")
            .with_retry(RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
            })
    }

    /// **Scenario**: a repeated request is served from cache, still audited,
    /// and adds nothing to the usage counters.
    #[tokio::test]
    async fn cache_hit_bypasses_provider() {
        let gateway = gateway_with(MockProvider::new("hello"));
        let request = CompletionRequest::new("hi").with_seed(7);

        let first = gateway.complete(request.clone()).await.unwrap();
        assert!(!first.cached);
        let second = gateway.complete(request).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.content, "hello");

        let history = gateway.call_history();
        assert_eq!(history.len(), 2);
        assert!(history[1].cached);
        let stats = gateway.stats();
        assert_eq!(stats.total_tokens as u32, first.total_tokens());
    }

    /// **Scenario**: transient failures are retried to success; the retry
    /// count lands in the audit record.
    #[tokio::test]
    async fn transient_errors_retry() {
        let provider = MockProvider::new("recovered")
            .failing_first(2, LlmError::Network("connection reset".into()));
        let gateway = gateway_with(provider);

        let result = gateway
            .complete(CompletionRequest::new("q").without_cache())
            .await
            .unwrap();
        assert_eq!(result.content, "recovered");
        let record = gateway.call_history().pop().unwrap();
        assert_eq!(record.retries, 2);
    }

    /// **Scenario**: fatal errors abort immediately without retries.
    #[tokio::test]
    async fn fatal_errors_abort() {
        let provider =
            MockProvider::new("never").failing_first(9, LlmError::Fatal("bad api key".into()));
        let gateway = gateway_with(provider);

        let error = gateway
            .complete(CompletionRequest::new("q").without_cache())
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::Fatal(_)));
        let record = gateway.call_history().pop().unwrap();
        assert_eq!(record.retries, 0);
        assert!(record.error.is_some());
    }

    /// **Scenario**: seeds derive deterministically from (master, step, agent)
    /// and vary when any input varies.
    #[test]
    fn seed_derivation() {
        let a = derive_seed(42, 3, "alice");
        let b = derive_seed(42, 3, "alice");
        assert_eq!(a, b);
        assert_ne!(a, derive_seed(42, 4, "alice"));
        assert_ne!(a, derive_seed(42, 3, "bob"));
        assert_ne!(a, derive_seed(43, 3, "alice"));
    }

    /// **Scenario**: the same request resolves the same cache key; different
    /// seeds resolve different keys.
    #[test]
    fn cache_key_includes_seed() {
        let messages = vec![ChatMessage::user("hi")];
        let a = LlmGateway::cache_key(&messages, "m", 0.7, Some(1));
        let b = LlmGateway::cache_key(&messages, "m", 0.7, Some(1));
        let c = LlmGateway::cache_key(&messages, "m", 0.7, Some(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
