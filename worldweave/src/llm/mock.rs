//! Mock provider for tests and offline runs.
//!
//! Replies are chosen by routing rules (substring match against the request
//! messages), then a scripted queue, then the fixed default. Failures can be
//! injected for retry-path tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmError, LlmProvider, ProviderReply};

/// Scripted in-process provider. Token counts are deterministic functions of
/// the text so assertions stay stable.
pub struct MockProvider {
    default_reply: String,
    routes: Mutex<Vec<(String, String)>>,
    scripted: Mutex<VecDeque<String>>,
    fail_remaining: AtomicU64,
    failure: Mutex<Option<LlmError>>,
    delay: Mutex<Option<std::time::Duration>>,
    calls: AtomicU64,
}

impl MockProvider {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            routes: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            fail_remaining: AtomicU64::new(0),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Adds a fixed latency to every call (for timeout-path tests).
    pub fn with_delay(self, delay: std::time::Duration) -> Self {
        *self.delay.lock().expect("mock delay poisoned") = Some(delay);
        self
    }

    /// When `needle` appears anywhere in the request messages, reply with
    /// `reply`. Routes are checked in insertion order.
    pub fn route(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.routes
            .lock()
            .expect("mock routes poisoned")
            .push((needle.into(), reply.into()));
        self
    }

    /// Queues replies returned (in order) before falling back to the default.
    /// Routing rules take precedence over the queue.
    pub fn scripted(self, replies: impl IntoIterator<Item = String>) -> Self {
        self.scripted
            .lock()
            .expect("mock script poisoned")
            .extend(replies);
        self
    }

    /// Makes the first `n` calls fail with (a clone of) `error`.
    pub fn failing_first(self, n: u64, error: LlmError) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        *self.failure.lock().expect("mock failure poisoned") = Some(error);
        self
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn estimate_tokens(text: &str) -> u32 {
        (text.len() as u32 / 4).max(1)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
        _seed: Option<u32>,
    ) -> Result<ProviderReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().expect("mock delay poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            let error = self
                .failure
                .lock()
                .expect("mock failure poisoned")
                .clone()
                .unwrap_or_else(|| LlmError::Provider("mock failure".into()));
            return Err(error);
        }

        let combined: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let content = {
            let routes = self.routes.lock().expect("mock routes poisoned");
            routes
                .iter()
                .find(|(needle, _)| combined.contains(needle))
                .map(|(_, reply)| reply.clone())
        }
        .or_else(|| {
            self.scripted
                .lock()
                .expect("mock script poisoned")
                .pop_front()
        })
        .unwrap_or_else(|| self.default_reply.clone());

        Ok(ProviderReply {
            prompt_tokens: Self::estimate_tokens(&combined),
            completion_tokens: Self::estimate_tokens(&content),
            content,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: routing wins over the script, script over the default.
    #[tokio::test]
    async fn reply_precedence() {
        let provider = MockProvider::new("default")
            .route("alice", "routed")
            .scripted(vec!["first".to_string()]);

        let routed = provider
            .complete("m", &[ChatMessage::user("hello alice")], 0.7, 100, None)
            .await
            .unwrap();
        assert_eq!(routed.content, "routed");

        let scripted = provider
            .complete("m", &[ChatMessage::user("hello bob")], 0.7, 100, None)
            .await
            .unwrap();
        assert_eq!(scripted.content, "first");

        let fallback = provider
            .complete("m", &[ChatMessage::user("hello bob")], 0.7, 100, None)
            .await
            .unwrap();
        assert_eq!(fallback.content, "default");
        assert_eq!(provider.call_count(), 3);
    }

    /// **Scenario**: injected failures drain before replies resume.
    #[tokio::test]
    async fn injected_failures_drain() {
        let provider =
            MockProvider::new("ok").failing_first(1, LlmError::RateLimit("429".into()));

        let error = provider
            .complete("m", &[ChatMessage::user("q")], 0.7, 100, None)
            .await
            .unwrap_err();
        assert!(error.is_rate_limit());

        let reply = provider
            .complete("m", &[ChatMessage::user("q")], 0.7, 100, None)
            .await
            .unwrap();
        assert_eq!(reply.content, "ok");
    }
}
