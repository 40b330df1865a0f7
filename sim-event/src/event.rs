//! Protocol-level event types (type + payload).
//! Payload-carrying variants use `serde_json::Value`; the engine serializes its
//! own structs into that before emitting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One engine event: wire shape is a tagged object (`type` + payload fields).
/// The envelope (simulation_id, timestamp) is applied separately.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    SimulationCreated { name: String },
    SimulationStarted,
    SimulationPaused { step: u64 },
    SimulationResumed { step: u64 },
    SimulationCompleted { step: u64 },
    SimulationError { message: String },

    StepStarted { step: u64 },
    StepCompleted { step: u64, status: String },

    PhaseStarted { step: u64, phase: String },
    PhaseCompleted { step: u64, phase: String },

    AgentThinking { agent_id: String, step: u64 },
    AgentResponded { agent_id: String, step: u64 },
    AgentSuspended { agent_id: String, step: u64 },

    MessageCreated { message: Value },
    MemoryCreated { agent_id: String, memory: Value },

    AppInitialized { app_id: String },
    AppActionRequested {
        app_id: String,
        agent_id: String,
        action: String,
    },
    AppActionExecuted {
        app_id: String,
        agent_id: String,
        action: String,
        success: bool,
    },
    AppActionFailed {
        app_id: String,
        agent_id: String,
        action: String,
        error: String,
    },
    AppObservationSent { app_id: String, to_agent: String },

    CheckpointCreated { checkpoint_id: String, step: u64 },
}

impl SimEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The `type` tag of this event, e.g. `step.completed`-style dotted form
    /// used by external subscribers for filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::SimulationCreated { .. } => "simulation.created",
            SimEvent::SimulationStarted => "simulation.started",
            SimEvent::SimulationPaused { .. } => "simulation.paused",
            SimEvent::SimulationResumed { .. } => "simulation.resumed",
            SimEvent::SimulationCompleted { .. } => "simulation.completed",
            SimEvent::SimulationError { .. } => "simulation.error",
            SimEvent::StepStarted { .. } => "step.started",
            SimEvent::StepCompleted { .. } => "step.completed",
            SimEvent::PhaseStarted { .. } => "phase.started",
            SimEvent::PhaseCompleted { .. } => "phase.completed",
            SimEvent::AgentThinking { .. } => "agent.thinking",
            SimEvent::AgentResponded { .. } => "agent.responded",
            SimEvent::AgentSuspended { .. } => "agent.suspended",
            SimEvent::MessageCreated { .. } => "message.created",
            SimEvent::MemoryCreated { .. } => "memory.created",
            SimEvent::AppInitialized { .. } => "app.initialized",
            SimEvent::AppActionRequested { .. } => "app.action.requested",
            SimEvent::AppActionExecuted { .. } => "app.action.executed",
            SimEvent::AppActionFailed { .. } => "app.action.failed",
            SimEvent::AppObservationSent { .. } => "app.observation.sent",
            SimEvent::CheckpointCreated { .. } => "checkpoint.created",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: serde tag is snake_case of the variant name.
    #[test]
    fn event_serializes_with_type_tag() {
        let event = SimEvent::StepStarted { step: 3 };
        let value = event.to_value().unwrap();
        assert_eq!(value["type"], "step_started");
        assert_eq!(value["step"], 3);
    }

    /// **Scenario**: kind() is the dotted filter string, stable across variants.
    #[test]
    fn event_kind_is_dotted() {
        assert_eq!(SimEvent::SimulationStarted.kind(), "simulation.started");
        assert_eq!(
            SimEvent::AppObservationSent {
                app_id: "paypal".into(),
                to_agent: "bob".into()
            }
            .kind(),
            "app.observation.sent"
        );
    }

    /// **Scenario**: events round-trip through JSON.
    #[test]
    fn event_roundtrips() {
        let event = SimEvent::AppActionExecuted {
            app_id: "paypal".into(),
            agent_id: "alice".into(),
            action: "transfer".into(),
            success: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SimEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
