//! Memory record types: episodic observations and semantic reflections.
//!
//! Reflections link to their sources by id, never by reference, so the memory
//! graph snapshots as plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An episodic memory: something the agent perceived.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: String,
    pub content: String,
    /// Who or what caused this observation.
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// 1..=10.
    pub importance: f64,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl Observation {
    pub fn new(content: impl Into<String>, source: impl Into<String>, importance: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            source: source.into(),
            timestamp: Utc::now(),
            importance,
            embedding: None,
            embedding_model: None,
        }
    }
}

/// A semantic memory: an insight synthesized from other memories.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reflection {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub importance: f64,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Parents: observations and/or earlier reflections, by id.
    pub source_memory_ids: Vec<String>,
    #[serde(default)]
    pub questions_addressed: Vec<String>,
}

impl Reflection {
    pub fn new(content: impl Into<String>, importance: f64, sources: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            importance,
            embedding: None,
            embedding_model: None,
            source_memory_ids: sources,
            questions_addressed: Vec::new(),
        }
    }
}

/// Either kind of memory, for retrieval and snapshotting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEntry {
    Observation(Observation),
    Reflection(Reflection),
}

impl MemoryEntry {
    pub fn id(&self) -> &str {
        match self {
            MemoryEntry::Observation(o) => &o.id,
            MemoryEntry::Reflection(r) => &r.id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            MemoryEntry::Observation(o) => &o.content,
            MemoryEntry::Reflection(r) => &r.content,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MemoryEntry::Observation(o) => o.timestamp,
            MemoryEntry::Reflection(r) => r.timestamp,
        }
    }

    pub fn importance(&self) -> f64 {
        match self {
            MemoryEntry::Observation(o) => o.importance,
            MemoryEntry::Reflection(r) => r.importance,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            MemoryEntry::Observation(o) => o.embedding.as_deref(),
            MemoryEntry::Reflection(r) => r.embedding.as_deref(),
        }
    }
}
