//! Agents: identity, five-trait personality, usage counters.
//!
//! An agent is a persona-bearing participant owned by exactly one simulation.
//! Its private memory lives in [`crate::memory::MemoryStore`]; the scheduler
//! looks the store up by agent id, never through a shared handle.

mod prompts;

pub use prompts::generate_system_prompt;

use serde::{Deserialize, Serialize};

/// Five personality scalars in [0, 1] (OCEAN order).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TraitVector {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
}

impl Default for TraitVector {
    fn default() -> Self {
        Self {
            openness: 0.5,
            conscientiousness: 0.5,
            extraversion: 0.5,
            agreeableness: 0.5,
            neuroticism: 0.5,
        }
    }
}

impl TraitVector {
    /// Builds a vector with every trait clamped into [0, 1].
    pub fn new(
        openness: f64,
        conscientiousness: f64,
        extraversion: f64,
        agreeableness: f64,
        neuroticism: f64,
    ) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 1.0);
        Self {
            openness: clamp(openness),
            conscientiousness: clamp(conscientiousness),
            extraversion: clamp(extraversion),
            agreeableness: clamp(agreeableness),
            neuroticism: clamp(neuroticism),
        }
    }

    /// Trait values in OCEAN order.
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.openness,
            self.conscientiousness,
            self.extraversion,
            self.agreeableness,
            self.neuroticism,
        ]
    }
}

/// A simulation participant.
///
/// The memory store is held by the simulation keyed by `id`; the struct itself
/// carries only identity, personality, and cumulative usage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub traits: TraitVector,
    #[serde(default)]
    pub background: String,
    pub system_prompt: String,
    /// Model override for this agent; None uses the simulation default.
    #[serde(default)]
    pub model: Option<String>,
    /// Scheduling priority for the `priority` ordering strategy.
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
}

impl Agent {
    /// Creates an agent whose id is its lowercased name and whose system
    /// prompt is generated from the traits.
    pub fn new(name: impl Into<String>, traits: TraitVector) -> Self {
        let name = name.into();
        let id = name.to_lowercase().replace(char::is_whitespace, "_");
        let system_prompt = generate_system_prompt(&name, &traits, "");
        Self {
            id,
            name,
            traits,
            background: String::new(),
            system_prompt,
            model: None,
            priority: 0.0,
            total_tokens: 0,
            total_cost: 0.0,
        }
    }

    /// Sets the background and regenerates the system prompt.
    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self.system_prompt = generate_system_prompt(&self.name, &self.traits, &self.background);
        self
    }

    /// Overrides the generated system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets an explicit id (defaults to the lowercased name).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Records one LLM call's usage against this agent.
    pub fn record_usage(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: traits are clamped into [0, 1] on construction.
    #[test]
    fn trait_vector_clamps() {
        let traits = TraitVector::new(1.5, -0.2, 0.5, 0.0, 1.0);
        assert_eq!(traits.openness, 1.0);
        assert_eq!(traits.conscientiousness, 0.0);
        assert_eq!(traits.as_array()[4], 1.0);
    }

    /// **Scenario**: the default id is the lowercased, underscored name.
    #[test]
    fn agent_id_defaults_to_name() {
        let agent = Agent::new("Alice Smith", TraitVector::default());
        assert_eq!(agent.id, "alice_smith");
        assert!(agent.system_prompt.contains("Alice Smith"));
    }

    /// **Scenario**: usage accumulates across calls.
    #[test]
    fn usage_accumulates() {
        let mut agent = Agent::new("bob", TraitVector::default());
        agent.record_usage(100, 0.002);
        agent.record_usage(50, 0.001);
        assert_eq!(agent.total_tokens, 150);
        assert!((agent.total_cost - 0.003).abs() < 1e-9);
    }
}
