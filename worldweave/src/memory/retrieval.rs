//! Scored memory retrieval: relevance + recency + importance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::observation::MemoryEntry;

/// Retrieval weights. Normalized so α+β+γ = 1 before scoring.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Relevance weight (cosine similarity to the query).
    pub alpha: f64,
    /// Recency weight (exponential decay).
    pub beta: f64,
    /// Importance weight ((value − 1) / 9).
    pub gamma: f64,
    /// Half-life of the recency decay, in hours.
    pub recency_decay_hours: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.2,
            recency_decay_hours: 24.0,
        }
    }
}

impl RetrievalConfig {
    /// Weights scaled to sum to one (guards degenerate all-zero configs).
    pub fn normalized(&self) -> (f64, f64, f64) {
        let total = self.alpha + self.beta + self.gamma;
        if total <= 0.0 {
            (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)
        } else {
            (self.alpha / total, self.beta / total, self.gamma / total)
        }
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Relevance in [0, 1]: clamped cosine; 0 when the embedding is missing.
fn relevance(entry: &MemoryEntry, query: Option<&[f32]>) -> f64 {
    match (entry.embedding(), query) {
        (Some(embedding), Some(query)) => cosine_similarity(embedding, query).clamp(0.0, 1.0) as f64,
        _ => 0.0,
    }
}

/// Recency in (0, 1]: half-life decay of hours since the timestamp.
pub fn recency(timestamp: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let hours = (now - timestamp).num_milliseconds() as f64 / 3_600_000.0;
    let hours = hours.max(0.0);
    0.5_f64.powf(hours / half_life_hours.max(1e-6))
}

/// Importance normalized from [1, 10] to [0, 1].
pub fn importance_norm(importance: f64) -> f64 {
    ((importance - 1.0) / 9.0).clamp(0.0, 1.0)
}

/// Composite score for one memory against a query embedding.
pub fn composite_score(
    config: &RetrievalConfig,
    entry: &MemoryEntry,
    query: Option<&[f32]>,
    now: DateTime<Utc>,
) -> f64 {
    let (alpha, beta, gamma) = config.normalized();
    alpha * relevance(entry, query)
        + beta * recency(entry.timestamp(), now, config.recency_decay_hours)
        + gamma * importance_norm(entry.importance())
}

/// Top-k memories by composite score. The full list is ranked and truncated,
/// so `retrieve(k)` is always a prefix of `retrieve(k + 1)`; ties break by
/// timestamp (newer first) then id so the order is total.
pub fn retrieve(
    config: &RetrievalConfig,
    memories: &[MemoryEntry],
    query: Option<&[f32]>,
    k: usize,
) -> Vec<MemoryEntry> {
    let now = Utc::now();
    let mut scored: Vec<(f64, &MemoryEntry)> = memories
        .iter()
        .map(|entry| (composite_score(config, entry, query, now), entry))
        .collect();
    scored.sort_by(|(sa, ea), (sb, eb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| eb.timestamp().cmp(&ea.timestamp()))
            .then_with(|| ea.id().cmp(eb.id()))
    });
    scored
        .into_iter()
        .take(k)
        .map(|(_, entry)| entry.clone())
        .collect()
}

/// Top-k by timestamp only (newest first).
pub fn retrieve_by_recency(memories: &[MemoryEntry], k: usize) -> Vec<MemoryEntry> {
    let mut sorted: Vec<&MemoryEntry> = memories.iter().collect();
    sorted.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    sorted.into_iter().take(k).cloned().collect()
}

/// Top-k by importance only (highest first).
pub fn retrieve_by_importance(memories: &[MemoryEntry], k: usize) -> Vec<MemoryEntry> {
    let mut sorted: Vec<&MemoryEntry> = memories.iter().collect();
    sorted.sort_by(|a, b| {
        b.importance()
            .partial_cmp(&a.importance())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.into_iter().take(k).cloned().collect()
}
