//! # Memory: dual-store episodic/semantic memory per agent
//!
//! Each agent owns a [`MemoryStore`] holding ordered [`Observation`]s and
//! [`Reflection`]s plus a running importance accumulator. New observations
//! are importance-scored ([`importance`]) and embedded ([`Embedder`]);
//! retrieval ([`retrieval`]) ranks by a composite of relevance, recency, and
//! importance; when accumulated importance crosses the reflection threshold a
//! synthesis pass turns recent experience into higher-level insights.
//!
//! Failure policy: any LLM sub-call failure during scoring or synthesis is
//! swallowed. Memories are never lost to a model outage; importance falls
//! back to a keyword heuristic and relevance degrades to zero without an
//! embedder.

mod embedder;
mod importance;
mod observation;
mod reflection;
mod retrieval;
mod store;

pub use embedder::{Embedder, HashEmbedder, OpenAiEmbedder};
pub use importance::{heuristic_importance, ImportanceRater};
pub use observation::{MemoryEntry, Observation, Reflection};
pub use reflection::ReflectionConfig;
pub use retrieval::{
    composite_score, cosine_similarity, importance_norm, recency, retrieve, retrieve_by_importance,
    retrieve_by_recency, RetrievalConfig,
};
pub use store::{MemoryConfig, MemorySnapshot, MemoryStore, PruneStrategy, RetentionPolicy};

use thiserror::Error;

/// Memory subsystem failures (embedding providers, snapshot decoding).
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("memory snapshot error: {0}")]
    Snapshot(String),
}
