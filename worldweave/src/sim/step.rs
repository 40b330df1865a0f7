//! Step execution data model: phases, statuses, per-agent actions, results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sim::ordering::OrderingStrategy;

/// The three canonical phases of one step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Perceive,
    Act,
    Commit,
}

impl StepPhase {
    pub fn name(&self) -> &'static str {
        match self {
            StepPhase::Perceive => "perceive",
            StepPhase::Act => "act",
            StepPhase::Commit => "commit",
        }
    }
}

/// Terminal status of one step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Timeout,
    Failed,
    Cancelled,
}

/// What one agent did during ACT.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentActionKind {
    Speak,
    Observe,
    Idle,
    Error,
}

/// Record of one agent's turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent_id: String,
    pub kind: AgentActionKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    pub step: u64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentAction {
    pub fn speak(agent_id: impl Into<String>, step: u64, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: AgentActionKind::Speak,
            content: content.into(),
            receiver_id: None,
            step,
            tokens_used: 0,
            cost: 0.0,
            latency_ms: 0,
            error: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn error(agent_id: impl Into<String>, step: u64, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: AgentActionKind::Error,
            content: String::new(),
            receiver_id: None,
            step,
            tokens_used: 0,
            cost: 0.0,
            latency_ms: 0,
            error: Some(error.into()),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn idle(agent_id: impl Into<String>, step: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: AgentActionKind::Idle,
            content: String::new(),
            receiver_id: None,
            step,
            tokens_used: 0,
            cost: 0.0,
            latency_ms: 0,
            error: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }
}

/// Input to one scheduler step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepContext {
    pub step: u64,
    pub simulation_id: String,
    pub ordering: OrderingStrategy,
    pub seed: Option<u64>,
}

/// Output of one scheduler step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub step: u64,
    pub status: StepStatus,
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub messages_sent: usize,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StepResult {
    pub fn new(step: u64, status: StepStatus) -> Self {
        Self {
            step,
            status,
            actions: Vec::new(),
            duration_seconds: 0.0,
            messages_sent: 0,
            tokens_used: 0,
            cost: 0.0,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: statuses and phases serialize snake_case for the wire.
    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_value(StepStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
        assert_eq!(
            serde_json::to_value(StepPhase::Perceive).unwrap(),
            serde_json::json!("perceive")
        );
        assert_eq!(StepPhase::Act.name(), "act");
    }

    /// **Scenario**: step results round-trip through JSON with actions.
    #[test]
    fn result_roundtrip() {
        let mut result = StepResult::new(4, StepStatus::Completed);
        result.actions.push(AgentAction::speak("alice", 4, "hi"));
        result.messages_sent = 1;

        let json = serde_json::to_string(&result).unwrap();
        let back: StepResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step, 4);
        assert_eq!(back.status, StepStatus::Completed);
        assert_eq!(back.actions.len(), 1);
        assert_eq!(back.actions[0].kind, AgentActionKind::Speak);
    }
}
