//! Per-instance app state: per-agent slices, shared map, and a small
//! agent-id ↔ display-name resolver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Runtime state of one app instance.
///
/// Two maps: per-agent state keyed by agent id, and shared state. BTreeMap
/// keeps serialization deterministic for snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppState {
    #[serde(default)]
    pub per_agent: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub shared: Map<String, Value>,
    /// display name (lowercased) → agent id.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_state(&self, agent_id: &str) -> Option<&Map<String, Value>> {
        self.per_agent.get(agent_id)
    }

    pub fn agent_state_mut(&mut self, agent_id: &str) -> Option<&mut Map<String, Value>> {
        self.per_agent.get_mut(agent_id)
    }

    pub fn set_agent_state(&mut self, agent_id: impl Into<String>, state: Map<String, Value>) {
        self.per_agent.insert(agent_id.into(), state);
    }

    /// Guarantees the agent has a (possibly empty) state slice.
    pub fn ensure_agent(&mut self, agent_id: &str) -> &mut Map<String, Value> {
        self.per_agent.entry(agent_id.to_string()).or_default()
    }

    pub fn register_agent_name(&mut self, agent_id: impl Into<String>, name: impl Into<String>) {
        self.names.insert(name.into().to_lowercase(), agent_id.into());
    }

    /// Resolves an agent reference: an exact id, or a display name
    /// (case-insensitive). Returns None for unknown references.
    pub fn resolve_agent(&self, reference: &str) -> Option<String> {
        if self.per_agent.contains_key(reference) {
            return Some(reference.to_string());
        }
        self.names.get(&reference.to_lowercase()).cloned()
    }

    /// Deep copy for stateless execution and logic-engine working copies.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}
