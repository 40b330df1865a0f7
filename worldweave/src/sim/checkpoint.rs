//! Checkpoint engine: capture, serialize, and restore simulation state.
//!
//! A checkpoint is `{version, metadata, state}`. Serialization is
//! deterministic for a given state (JSON maps are key-sorted), so identical
//! states serialize identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::memory::MemorySnapshot;
use crate::message::Message;

/// Bumped when the checkpoint wire format changes shape.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Checkpoint subsystem failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
    #[error("checkpoint storage error: {0}")]
    Storage(String),
}

/// Header describing one checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub id: String,
    pub simulation_id: String,
    pub step: u64,
    /// e.g. "manual", "auto", "pause", "shutdown".
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Complete simulation state at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimulationState {
    pub simulation_id: String,
    pub step: u64,
    pub name: String,
    pub status: String,
    pub config: Value,
    /// Agents as structured records (identity, traits, usage).
    pub agents: Vec<Value>,
    pub messages: Vec<Message>,
    /// `{type, directed, nodes, edges}` from the topology graph.
    pub topology: Value,
    /// Flattened per-agent memory records.
    pub agent_memories: BTreeMap<String, MemorySnapshot>,
    /// Per-app snapshot blobs (state + audit log).
    pub app_states: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Metadata plus state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub state: SimulationState,
}

/// Pluggable checkpoint codec.
pub trait CheckpointSerializer: Send + Sync {
    fn serialize(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>, CheckpointError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Checkpoint, CheckpointError>;
}

/// JSON codec: `{version, metadata, state}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCheckpointSerializer;

impl CheckpointSerializer for JsonCheckpointSerializer {
    fn serialize(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>, CheckpointError> {
        let blob = serde_json::json!({
            "version": CHECKPOINT_VERSION,
            "metadata": checkpoint.metadata,
            "state": checkpoint.state,
        });
        serde_json::to_vec(&blob).map_err(|e| CheckpointError::Storage(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Checkpoint, CheckpointError> {
        let blob: Value =
            serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        let version = blob["version"].as_u64().unwrap_or(0) as u32;
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt(format!(
                "unsupported checkpoint version {}",
                version
            )));
        }
        let metadata = serde_json::from_value(blob["metadata"].clone())
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        let state = serde_json::from_value(blob["state"].clone())
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        Ok(Checkpoint { metadata, state })
    }
}

/// In-memory checkpoint registry keyed by checkpoint id.
pub struct CheckpointManager {
    serializer: Box<dyn CheckpointSerializer>,
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new(Box::new(JsonCheckpointSerializer))
    }
}

impl CheckpointManager {
    pub fn new(serializer: Box<dyn CheckpointSerializer>) -> Self {
        Self {
            serializer,
            checkpoints: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a new checkpoint and returns it.
    pub fn create(
        &self,
        simulation_id: impl Into<String>,
        step: u64,
        state: SimulationState,
        reason: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Checkpoint {
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata {
                id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
                simulation_id: simulation_id.into(),
                step,
                reason: reason.into(),
                created_at: Utc::now(),
                metadata,
            },
            state,
        };
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .insert(checkpoint.metadata.id.clone(), checkpoint.clone());
        checkpoint
    }

    pub fn get(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .get(checkpoint_id)
            .cloned()
    }

    /// Metadata headers, newest first, optionally filtered by simulation.
    pub fn list(&self, simulation_id: Option<&str>) -> Vec<CheckpointMetadata> {
        let mut headers: Vec<CheckpointMetadata> = self
            .checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .values()
            .filter(|c| {
                simulation_id
                    .map(|id| c.metadata.simulation_id == id)
                    .unwrap_or(true)
            })
            .map(|c| c.metadata.clone())
            .collect();
        headers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        headers
    }

    pub fn delete(&self, checkpoint_id: &str) -> bool {
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .remove(checkpoint_id)
            .is_some()
    }

    pub fn serialize(&self, checkpoint_id: &str) -> Result<Vec<u8>, CheckpointError> {
        let checkpoint = self
            .get(checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        self.serializer.serialize(&checkpoint)
    }

    /// Deserializes, registers, and returns a checkpoint.
    pub fn restore(&self, bytes: &[u8]) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.serializer.deserialize(bytes)?;
        self.checkpoints
            .lock()
            .expect("checkpoint map poisoned")
            .insert(checkpoint.metadata.id.clone(), checkpoint.clone());
        Ok(checkpoint)
    }

    /// Removes checkpoints (all, or one simulation's); returns the count.
    pub fn clear(&self, simulation_id: Option<&str>) -> usize {
        let mut checkpoints = self.checkpoints.lock().expect("checkpoint map poisoned");
        match simulation_id {
            None => {
                let count = checkpoints.len();
                checkpoints.clear();
                count
            }
            Some(id) => {
                let doomed: Vec<String> = checkpoints
                    .iter()
                    .filter(|(_, c)| c.metadata.simulation_id == id)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &doomed {
                    checkpoints.remove(key);
                }
                doomed.len()
            }
        }
    }
}
