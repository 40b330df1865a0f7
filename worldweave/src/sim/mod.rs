//! Simulation core: configuration, ordering, control, the step scheduler,
//! checkpointing, the event bus, and the runner that owns it all.
//!
//! One step is PERCEIVE → ACT → COMMIT. Messages and app observations
//! produced in step t become visible to agents at PERCEIVE of step t+1,
//! which keeps the simulation turn-based and free of read-after-write
//! hazards across parallel agents.

pub mod bus;
pub mod checkpoint;
pub mod config;
pub mod control;
pub mod ordering;
pub mod runner;
mod scheduler;
pub mod step;

pub use bus::EventBus;
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointManager, CheckpointMetadata, CheckpointSerializer,
    JsonCheckpointSerializer, SimulationState, CHECKPOINT_VERSION,
};
pub use config::{LlmDefaults, SimulationConfig};
pub use control::{
    retry_with_backoff, with_timeout, ErrorStrategy, SimulationController, StepPolicy,
    TimeoutOutcome,
};
pub use ordering::{batch_agents, order_agents, OrderingInputs, OrderingStrategy};
pub use runner::{SimError, Simulation, SimulationStatus, StatusReport};
pub use step::{AgentAction, AgentActionKind, StepContext, StepPhase, StepResult, StepStatus};
