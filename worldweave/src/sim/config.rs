//! Simulation configuration: topology, ordering, step policy, LLM defaults.
//!
//! Everything is serde-loadable from JSON with workable defaults, so a
//! scenario file can specify only what it cares about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::MemoryConfig;
use crate::sim::control::StepPolicy;
use crate::sim::ordering::OrderingStrategy;
use crate::topology::{RoutingMode, TopologySpec};

/// Defaults for gateway calls made on behalf of agents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmDefaults {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub use_cache: bool,
}

impl Default for LlmDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 500,
            use_cache: true,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default)]
    pub topology: TopologySpec,
    #[serde(default)]
    pub routing_mode: RoutingMode,
    #[serde(default)]
    pub ordering: OrderingStrategy,
    #[serde(default)]
    pub step: StepPolicy,
    #[serde(default)]
    pub llm: LlmDefaults,
    /// Seeds every deterministic decision (ordering shuffles, stochastic
    /// topologies, per-call LLM seeds).
    #[serde(default)]
    pub master_seed: Option<u64>,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// App ids to instantiate from the registry.
    #[serde(default)]
    pub apps: Vec<String>,
    /// Per-app initial config overlay: `app_id -> config object`.
    #[serde(default)]
    pub app_config: Map<String, Value>,
}

fn default_max_steps() -> u64 {
    20
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_steps: default_max_steps(),
            topology: TopologySpec::default(),
            routing_mode: RoutingMode::default(),
            ordering: OrderingStrategy::default(),
            step: StepPolicy::default(),
            llm: LlmDefaults::default(),
            master_seed: None,
            memory: MemoryConfig::default(),
            apps: Vec::new(),
            app_config: Map::new(),
        }
    }
}

impl SimulationConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Config overlay for one app (empty when unspecified).
    pub fn config_for_app(&self, app_id: &str) -> Map<String, Value> {
        self.app_config
            .get(app_id)
            .and_then(|value| value.as_object())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: a sparse JSON config fills in defaults.
    #[test]
    fn sparse_config_parses() {
        let config = SimulationConfig::from_json(&json!({
            "name": "focus group",
            "max_steps": 5,
            "topology": {"type": "hub_spoke", "hub_id": "mod"},
            "apps": ["paypal"],
        }))
        .unwrap();

        assert_eq!(config.name, "focus group");
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.step.max_concurrent_agents, 5);
        assert_eq!(config.apps, vec!["paypal".to_string()]);
    }

    /// **Scenario**: per-app config overlay is addressable by app id.
    #[test]
    fn app_config_overlay() {
        let config = SimulationConfig::from_json(&json!({
            "app_config": {"paypal": {"initial_balance": 1000.0}},
        }))
        .unwrap();
        assert_eq!(
            config.config_for_app("paypal")["initial_balance"],
            json!(1000.0)
        );
        assert!(config.config_for_app("other").is_empty());
    }
}
