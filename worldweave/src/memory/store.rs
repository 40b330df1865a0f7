//! Per-agent dual-store memory: observations + reflections with an
//! importance accumulator, scored retrieval, synthesis, and retention.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{CompletionRequest, LlmGateway};
use crate::memory::embedder::Embedder;
use crate::memory::importance::ImportanceRater;
use crate::memory::observation::{MemoryEntry, Observation, Reflection};
use crate::memory::reflection::{
    parse_questions, question_prompt, synthesis_prompt, ReflectionConfig,
};
use crate::memory::retrieval::{
    importance_norm, recency, retrieve, retrieve_by_importance, retrieve_by_recency,
    RetrievalConfig,
};

/// How observations are culled past the cap.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PruneStrategy {
    /// Keep the best by 0.7·importance + 0.3·recency.
    ImportanceWeighted,
    /// Keep the last arrivals.
    Fifo,
    /// Keep the newest by timestamp.
    Recency,
}

/// Caps for a long-running agent's memory.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_observations: usize,
    pub max_reflections: usize,
    pub strategy: PruneStrategy,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_observations: 1000,
            max_reflections: 100,
            strategy: PruneStrategy::ImportanceWeighted,
        }
    }
}

/// Memory subsystem configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub retrieval: RetrievalConfig,
    pub reflection: ReflectionConfig,
    pub retention: RetentionPolicy,
    /// Heuristic scoring by default; LLM scoring is opt-in for speed.
    #[serde(default)]
    pub use_llm_importance: bool,
}

/// Serializable snapshot of one agent's memory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemorySnapshot {
    pub observations: Vec<Observation>,
    pub reflections: Vec<Reflection>,
    pub importance_accumulator: f64,
}

/// One agent's private memory store.
///
/// Owned by the simulation keyed by agent id; the scheduler never touches one
/// store from two tasks at once.
pub struct MemoryStore {
    config: MemoryConfig,
    observations: Vec<Observation>,
    reflections: Vec<Reflection>,
    importance_accumulator: f64,
    embedder: Option<Arc<dyn Embedder>>,
    gateway: Option<Arc<LlmGateway>>,
    embedding_cache: HashMap<String, Vec<f32>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            observations: Vec::new(),
            reflections: Vec::new(),
            importance_accumulator: 0.0,
            embedder: None,
            gateway: None,
            embedding_cache: HashMap::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    pub fn importance_accumulator(&self) -> f64 {
        self.importance_accumulator
    }

    fn all_memories(&self) -> Vec<MemoryEntry> {
        self.observations
            .iter()
            .cloned()
            .map(MemoryEntry::Observation)
            .chain(self.reflections.iter().cloned().map(MemoryEntry::Reflection))
            .collect()
    }

    /// Embeds text through the cache; None when no embedder is wired or the
    /// provider fails (the memory is still stored, relevance just scores 0).
    async fn embed(&mut self, text: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.embedding_cache.get(text) {
            return Some(cached.clone());
        }
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(&[text]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let vector = vectors.remove(0);
                self.embedding_cache.insert(text.to_string(), vector.clone());
                Some(vector)
            }
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "embedding failed; storing memory without vector");
                None
            }
        }
    }

    /// Adds an observation: score, embed, append, accumulate; synthesize when
    /// the accumulator crosses the threshold; then enforce retention.
    pub async fn add_observation(
        &mut self,
        content: impl Into<String>,
        source: impl Into<String>,
        importance: Option<f64>,
    ) -> Observation {
        let content = content.into();
        let importance = match importance {
            Some(value) => value.clamp(1.0, 10.0),
            None => {
                ImportanceRater::new(self.gateway.clone(), self.config.use_llm_importance)
                    .rate(&content)
                    .await
            }
        };

        let mut observation = Observation::new(content.clone(), source, importance);
        observation.embedding = self.embed(&content).await;

        self.observations.push(observation.clone());
        self.importance_accumulator += importance;

        if self.config.reflection.enabled
            && self.importance_accumulator >= self.config.reflection.threshold
        {
            self.synthesize_reflections().await;
        }

        self.enforce_retention();
        observation
    }

    /// Retrieves the top-k memories for a query by composite score.
    pub async fn retrieve(
        &mut self,
        query: &str,
        k: usize,
        include_reflections: bool,
    ) -> Vec<MemoryEntry> {
        let query_embedding = self.embed(query).await;
        let memories: Vec<MemoryEntry> = if include_reflections {
            self.all_memories()
        } else {
            self.observations
                .iter()
                .cloned()
                .map(MemoryEntry::Observation)
                .collect()
        };
        retrieve(
            &self.config.retrieval,
            &memories,
            query_embedding.as_deref(),
            k,
        )
    }

    pub fn recent(&self, k: usize) -> Vec<MemoryEntry> {
        retrieve_by_recency(&self.all_memories(), k)
    }

    pub fn most_important(&self, k: usize) -> Vec<MemoryEntry> {
        retrieve_by_importance(&self.all_memories(), k)
    }

    /// Synthesizes reflections from the recent observation window, then
    /// resets the accumulator. Every LLM failure is swallowed: no memory is
    /// lost and nothing is thrown.
    pub async fn synthesize_reflections(&mut self) -> Vec<Reflection> {
        if !self.config.reflection.enabled || self.observations.is_empty() {
            self.importance_accumulator = 0.0;
            return Vec::new();
        }
        let gateway = match self.gateway.clone() {
            Some(gateway) => gateway,
            None => {
                self.importance_accumulator = 0.0;
                return Vec::new();
            }
        };

        let window: Vec<String> = self
            .observations
            .iter()
            .rev()
            .take(20)
            .map(|o| o.content.clone())
            .collect();
        let questions_wanted = self.config.reflection.questions_per_pass;

        let questions = match gateway
            .complete(CompletionRequest::new(question_prompt(
                &window,
                questions_wanted,
            )))
            .await
        {
            Ok(completion) => parse_questions(&completion.content, questions_wanted),
            Err(error) => {
                tracing::warn!(%error, "reflection question generation failed");
                Vec::new()
            }
        };

        let mut created = Vec::new();
        for question in questions {
            let related = {
                let query_embedding = self.embed(&question).await;
                retrieve(
                    &self.config.retrieval,
                    &self.all_memories(),
                    query_embedding.as_deref(),
                    self.config.reflection.memories_per_question,
                )
            };
            if related.is_empty() {
                continue;
            }

            let contents: Vec<String> =
                related.iter().map(|m| m.content().to_string()).collect();
            let insight = match gateway
                .complete(CompletionRequest::new(synthesis_prompt(
                    &question, &contents,
                )))
                .await
            {
                Ok(completion) => completion.content.trim().to_string(),
                Err(error) => {
                    tracing::warn!(%error, "reflection synthesis failed");
                    continue;
                }
            };
            if insight.is_empty() {
                continue;
            }

            let mut reflection = Reflection::new(
                insight.clone(),
                self.config.reflection.reflection_importance,
                related.iter().map(|m| m.id().to_string()).collect(),
            );
            reflection.questions_addressed = vec![question];
            reflection.embedding = self.embed(&insight).await;

            self.reflections.push(reflection.clone());
            created.push(reflection);
        }

        self.importance_accumulator = 0.0;
        self.enforce_retention();
        created
    }

    fn enforce_retention(&mut self) {
        let policy = self.config.retention;
        if self.observations.len() > policy.max_observations {
            match policy.strategy {
                PruneStrategy::ImportanceWeighted => {
                    let now = chrono::Utc::now();
                    let half_life = self.config.retrieval.recency_decay_hours;
                    let mut scored: Vec<(f64, Observation)> = self
                        .observations
                        .drain(..)
                        .map(|o| {
                            let score = 0.7 * importance_norm(o.importance)
                                + 0.3 * recency(o.timestamp, now, half_life);
                            (score, o)
                        })
                        .collect();
                    scored.sort_by(|(a, _), (b, _)| {
                        b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    scored.truncate(policy.max_observations);
                    // Restore chronological order for the survivors.
                    scored.sort_by_key(|(_, o)| o.timestamp);
                    self.observations = scored.into_iter().map(|(_, o)| o).collect();
                }
                PruneStrategy::Fifo => {
                    let excess = self.observations.len() - policy.max_observations;
                    self.observations.drain(..excess);
                }
                PruneStrategy::Recency => {
                    self.observations.sort_by_key(|o| o.timestamp);
                    let excess = self.observations.len() - policy.max_observations;
                    self.observations.drain(..excess);
                }
            }
        }

        // Reflections have their own, smaller cap and a simple newest-wins cull.
        if self.reflections.len() > policy.max_reflections {
            let excess = self.reflections.len() - policy.max_reflections;
            self.reflections.drain(..excess);
        }
    }

    /// A short formatted snippet of the most recent memories for prompts.
    pub fn context_for_prompt(&self, recent_k: usize) -> String {
        let recent: Vec<&Observation> = self
            .observations
            .iter()
            .rev()
            .take(recent_k)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if recent.is_empty() {
            return String::new();
        }
        let lines: String = recent
            .iter()
            .map(|o| format!("- {}\n", o.content))
            .collect();
        format!("Recent memories:\n{}", lines.trim_end())
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.reflections.clear();
        self.importance_accumulator = 0.0;
        self.embedding_cache.clear();
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            observations: self.observations.clone(),
            reflections: self.reflections.clone(),
            importance_accumulator: self.importance_accumulator,
        }
    }

    pub fn restore(&mut self, snapshot: MemorySnapshot) {
        self.observations = snapshot.observations;
        self.reflections = snapshot.reflections;
        self.importance_accumulator = snapshot.importance_accumulator;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;
    use crate::memory::embedder::HashEmbedder;

    fn reflective_gateway() -> Arc<LlmGateway> {
        let provider = MockProvider::new("fallback")
            .route(
                "generate",
                "What pattern connects the payments?\nWho is trustworthy?",
            )
            .route(
                "concise insight",
                "Payments cluster around rent day, so money stress recurs monthly.",
            );
        Arc::new(LlmGateway::new(Arc::new(provider), "mock-model"))
    }

    /// **Scenario**: the reflection trigger — threshold 10, importances
    /// 2,2,2,2,3 reach 11, one synthesis pass runs, the accumulator resets,
    /// and the reflection's sources are a subset of the observation ids.
    #[tokio::test]
    async fn reflection_trigger_at_threshold() {
        let config = MemoryConfig {
            reflection: ReflectionConfig {
                threshold: 10.0,
                ..ReflectionConfig::default()
            },
            ..MemoryConfig::default()
        };
        let mut store = MemoryStore::new(config)
            .with_embedder(Arc::new(HashEmbedder::new(32)))
            .with_gateway(reflective_gateway());

        for importance in [2.0, 2.0, 2.0, 2.0] {
            store
                .add_observation("rent payment drew near", "test", Some(importance))
                .await;
            assert!(store.reflections().is_empty());
        }
        store
            .add_observation("rent payment was missed", "test", Some(3.0))
            .await;

        assert_eq!(store.importance_accumulator(), 0.0);
        assert!(!store.reflections().is_empty());

        let observation_ids: std::collections::HashSet<&str> =
            store.observations().iter().map(|o| o.id.as_str()).collect();
        for reflection in store.reflections() {
            assert_eq!(reflection.importance, 9.0);
            for source in &reflection.source_memory_ids {
                assert!(observation_ids.contains(source.as_str()));
            }
        }
    }

    /// **Scenario**: without a gateway, the pass resets the accumulator and
    /// produces no reflections (failure swallowed, no memory lost).
    #[tokio::test]
    async fn reflection_without_gateway_is_silent() {
        let mut store = MemoryStore::new(MemoryConfig::default());
        for _ in 0..6 {
            store.add_observation("something notable", "t", Some(2.0)).await;
        }
        assert_eq!(store.importance_accumulator(), 0.0);
        assert!(store.reflections().is_empty());
        assert_eq!(store.observations().len(), 6);
    }

    /// **Scenario**: fifo retention keeps the latest arrivals.
    #[tokio::test]
    async fn fifo_retention() {
        let config = MemoryConfig {
            retention: RetentionPolicy {
                max_observations: 3,
                max_reflections: 10,
                strategy: PruneStrategy::Fifo,
            },
            reflection: ReflectionConfig {
                enabled: false,
                ..ReflectionConfig::default()
            },
            ..MemoryConfig::default()
        };
        let mut store = MemoryStore::new(config);
        for i in 0..5 {
            store
                .add_observation(format!("event {}", i), "t", Some(1.0))
                .await;
        }
        let contents: Vec<&str> = store.observations().iter().map(|o| o.content.as_str()).collect();
        assert_eq!(contents, vec!["event 2", "event 3", "event 4"]);
    }

    /// **Scenario**: importance-weighted retention keeps the significant one.
    #[tokio::test]
    async fn importance_weighted_retention() {
        let config = MemoryConfig {
            retention: RetentionPolicy {
                max_observations: 2,
                max_reflections: 10,
                strategy: PruneStrategy::ImportanceWeighted,
            },
            reflection: ReflectionConfig {
                enabled: false,
                ..ReflectionConfig::default()
            },
            ..MemoryConfig::default()
        };
        let mut store = MemoryStore::new(config);
        store.add_observation("mundane a", "t", Some(1.0)).await;
        store.add_observation("vital event", "t", Some(10.0)).await;
        store.add_observation("mundane b", "t", Some(1.0)).await;

        assert_eq!(store.observations().len(), 2);
        assert!(store
            .observations()
            .iter()
            .any(|o| o.content == "vital event"));
    }

    /// **Scenario**: the prompt helper lists the most recent memories.
    #[tokio::test]
    async fn prompt_context() {
        let mut store = MemoryStore::new(MemoryConfig {
            reflection: ReflectionConfig {
                enabled: false,
                ..ReflectionConfig::default()
            },
            ..MemoryConfig::default()
        });
        assert_eq!(store.context_for_prompt(3), "");
        for i in 0..4 {
            store
                .add_observation(format!("event {}", i), "t", Some(2.0))
                .await;
        }
        let context = store.context_for_prompt(2);
        assert!(context.starts_with("Recent memories:"));
        assert!(context.contains("event 2"));
        assert!(context.contains("event 3"));
        assert!(!context.contains("event 0"));
    }
}
