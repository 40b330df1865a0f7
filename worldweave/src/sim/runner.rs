//! Simulation runner: owns agents, memories, topology, apps, the message
//! log, and the checkpoint registry; wires the gateway, controller, and event
//! bus; drives the step loop.
//!
//! Ownership: everything lives here and is addressed by id. The scheduler
//! (see `scheduler.rs`) executes steps against this state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::agent::Agent;
use crate::apps::{ActionLogEntry, AppError, AppInstance, AppRegistry};
use crate::goals::{evaluate, EvaluationInputs, GoalEvaluationResult, GoalSpec};
use crate::llm::{LlmError, LlmGateway, LlmProvider};
use crate::memory::{Embedder, MemoryStore};
use crate::message::Message;
use crate::sim::bus::EventBus;
use crate::sim::checkpoint::{
    Checkpoint, CheckpointError, CheckpointManager, JsonCheckpointSerializer, SimulationState,
};
use crate::sim::config::SimulationConfig;
use crate::sim::control::SimulationController;
use crate::sim::step::StepResult;
use crate::topology::{build_topology, TopologyError, TopologyGraph};
use sim_event::SimEvent;

/// Runner-level failures.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// Invariant breach inside the scheduler itself; fatal.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Lifecycle state of the simulation.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SimulationStatus::Created => "created",
            SimulationStatus::Running => "running",
            SimulationStatus::Paused => "paused",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Cancelled => "cancelled",
            SimulationStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time status report.
#[derive(Clone, Debug, serde::Serialize)]
pub struct StatusReport {
    pub id: String,
    pub name: String,
    pub status: SimulationStatus,
    pub current_step: u64,
    pub agent_count: usize,
    pub message_count: usize,
    pub suspended_agents: Vec<String>,
}

/// One multi-agent simulation.
pub struct Simulation {
    pub(crate) id: String,
    pub(crate) config: SimulationConfig,
    pub(crate) status: SimulationStatus,
    pub(crate) current_step: u64,
    pub(crate) agents: BTreeMap<String, Agent>,
    pub(crate) memories: BTreeMap<String, MemoryStore>,
    pub(crate) topology: TopologyGraph,
    pub(crate) apps: BTreeMap<String, AppInstance>,
    pub(crate) messages: Vec<Message>,
    /// Messages staged last step, delivered at the next PERCEIVE.
    pub(crate) inbox: Vec<Message>,
    pub(crate) outputs: Vec<String>,
    pub(crate) handoffs: Vec<String>,
    pub(crate) goal: Option<GoalSpec>,
    pub(crate) gateway: Arc<LlmGateway>,
    pub(crate) controller: Arc<SimulationController>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) registry: AppRegistry,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) initialized: bool,
}

impl Simulation {
    /// Creates a simulation around a provider. Agents and apps attach before
    /// the first step.
    pub fn new(config: SimulationConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let mut gateway = LlmGateway::new(provider, config.llm.model.clone())
            .with_simulation_id(id.clone())
            .with_max_concurrent_calls(config.step.max_concurrent_llm_calls);
        if let Some(master_seed) = config.master_seed {
            gateway = gateway.with_master_seed(master_seed);
        }

        let bus = Arc::new(EventBus::new());
        bus.set_simulation_id(id.clone());
        bus.emit(SimEvent::SimulationCreated {
            name: config.name.clone(),
        });

        Self {
            id,
            topology: TopologyGraph::new(config.topology.directed, "custom"),
            config,
            status: SimulationStatus::Created,
            current_step: 0,
            agents: BTreeMap::new(),
            memories: BTreeMap::new(),
            apps: BTreeMap::new(),
            messages: Vec::new(),
            inbox: Vec::new(),
            outputs: Vec::new(),
            handoffs: Vec::new(),
            goal: None,
            gateway: Arc::new(gateway),
            controller: Arc::new(SimulationController::new()),
            bus,
            checkpoints: CheckpointManager::default(),
            registry: AppRegistry::with_builtins(),
            embedder: None,
            initialized: false,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_goal(mut self, goal: GoalSpec) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn with_registry(mut self, registry: AppRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    pub fn memory(&self, agent_id: &str) -> Option<&MemoryStore> {
        self.memories.get(agent_id)
    }

    pub fn app(&self, app_id: &str) -> Option<&AppInstance> {
        self.apps.get(app_id)
    }

    pub fn topology(&self) -> &TopologyGraph {
        &self.topology
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    pub fn controller(&self) -> &Arc<SimulationController> {
        &self.controller
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<sim_event::Envelope> {
        self.bus.subscribe()
    }

    /// Adds an agent. Before initialization the topology picks it up when it
    /// is built; afterwards the node (and app slices) attach immediately.
    pub fn add_agent(&mut self, agent: Agent) {
        let agent_id = agent.id.clone();
        let name = agent.name.clone();

        let mut store = MemoryStore::new(self.config.memory.clone())
            .with_gateway(Arc::clone(&self.gateway));
        if let Some(embedder) = &self.embedder {
            store = store.with_embedder(Arc::clone(embedder));
        }
        self.memories.insert(agent_id.clone(), store);
        self.agents.insert(agent_id.clone(), agent);

        if self.initialized {
            self.topology.add_node(agent_id.clone());
            for app in self.apps.values_mut() {
                app.add_agent(&agent_id, &name);
            }
        }
    }

    /// Removes an agent; the topology node goes with it.
    pub fn remove_agent(&mut self, agent_id: &str) {
        self.agents.remove(agent_id);
        self.memories.remove(agent_id);
        self.topology.remove_node(agent_id);
    }

    /// Builds the topology from the spec and instantiates the configured
    /// apps. Idempotent; the first step calls it automatically.
    pub fn initialize(&mut self) -> Result<(), SimError> {
        if self.initialized {
            return Ok(());
        }
        let agent_ids: Vec<String> = self.agents.keys().cloned().collect();
        let seed = self.config.master_seed.unwrap_or(0);
        self.topology = build_topology(&self.config.topology, &agent_ids, seed)?;

        let agent_pairs: Vec<(String, String)> = self
            .agents
            .values()
            .map(|agent| (agent.id.clone(), agent.name.clone()))
            .collect();
        for app_id in self.config.apps.clone() {
            let mut app = self.registry.create_instance(&app_id)?;
            app.initialize(
                self.id.clone(),
                &agent_pairs,
                self.config.config_for_app(&app_id),
            );
            self.bus.emit(SimEvent::AppInitialized {
                app_id: app_id.clone(),
            });
            self.apps.insert(app_id, app);
        }

        self.initialized = true;
        Ok(())
    }

    /// Runs up to `max_steps` further steps, stopping early on goal
    /// achievement, cancellation, or the configured step ceiling.
    pub async fn run(&mut self, max_steps: u64) -> Result<Vec<StepResult>, SimError> {
        let mut results = Vec::new();
        for _ in 0..max_steps {
            if matches!(
                self.status,
                SimulationStatus::Completed | SimulationStatus::Cancelled
            ) {
                break;
            }
            self.controller.wait_if_paused().await;
            if self.controller.is_cancelled() {
                self.status = SimulationStatus::Cancelled;
                break;
            }

            let result = self.step().await?;
            results.push(result);

            if let Some(evaluation) = self.evaluate_goal() {
                if evaluation.achieved {
                    self.status = SimulationStatus::Completed;
                    self.bus.emit(SimEvent::SimulationCompleted {
                        step: self.current_step,
                    });
                    break;
                }
            }
            if self.current_step >= self.config.max_steps {
                self.status = SimulationStatus::Completed;
                self.bus.emit(SimEvent::SimulationCompleted {
                    step: self.current_step,
                });
                break;
            }
        }
        Ok(results)
    }

    pub fn pause(&mut self) {
        self.controller.pause();
        self.status = SimulationStatus::Paused;
        self.bus.emit(SimEvent::SimulationPaused {
            step: self.current_step,
        });
        if self.config.step.auto_checkpoint_on_pause && self.initialized {
            self.checkpoint("pause");
        }
    }

    pub fn resume(&mut self) {
        self.controller.resume();
        if self.status == SimulationStatus::Paused {
            self.status = SimulationStatus::Running;
        }
        self.bus.emit(SimEvent::SimulationResumed {
            step: self.current_step,
        });
    }

    pub fn cancel(&mut self) {
        self.controller.cancel();
        self.status = SimulationStatus::Cancelled;
    }

    /// Injects a stimulus, bypassing the topology: the content lands directly
    /// in every targeted agent's memory store.
    pub async fn inject(&mut self, content: &str, targets: Option<&[String]>) {
        let target_ids: Vec<String> = match targets {
            Some(targets) => targets.to_vec(),
            None => self.agents.keys().cloned().collect(),
        };
        for agent_id in target_ids {
            if let Some(memory) = self.memories.get_mut(&agent_id) {
                let observation = memory.add_observation(content, "stimulus", None).await;
                self.bus.emit(SimEvent::MemoryCreated {
                    agent_id: agent_id.clone(),
                    memory: serde_json::to_value(&observation).unwrap_or(Value::Null),
                });
            }
        }
    }

    /// Records a completed agent↔user handoff for goal evaluation.
    pub fn record_handoff(&mut self, handoff_id: impl Into<String>) {
        self.handoffs.push(handoff_id.into());
    }

    /// Evaluates the goal spec (when set) against current state.
    pub fn evaluate_goal(&self) -> Option<GoalEvaluationResult> {
        let goal = self.goal.as_ref()?;
        let app_states: HashMap<String, Value> = self
            .apps
            .iter()
            .map(|(app_id, app)| (app_id.clone(), app.state_value()))
            .collect();
        let action_log: Vec<ActionLogEntry> = self
            .apps
            .values()
            .flat_map(|app| app.action_log_entries().iter().cloned())
            .collect();
        Some(evaluate(
            goal,
            &EvaluationInputs {
                app_states: &app_states,
                action_log: &action_log,
                agent_outputs: &self.outputs,
                handoffs: &self.handoffs,
                step: Some(self.current_step),
            },
        ))
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            id: self.id.clone(),
            name: self.config.name.clone(),
            status: self.status,
            current_step: self.current_step,
            agent_count: self.agents.len(),
            message_count: self.messages.len(),
            suspended_agents: self.controller.suspended_agents(),
        }
    }

    // -- checkpointing ------------------------------------------------------

    /// Captures the full state into the checkpoint registry.
    pub fn checkpoint(&self, reason: &str) -> Checkpoint {
        self.checkpoints.create(
            self.id.clone(),
            self.current_step,
            self.capture_state(),
            reason,
            Map::new(),
        )
    }

    /// Serialized snapshot of the current state.
    pub fn snapshot(&self) -> Result<Vec<u8>, SimError> {
        let checkpoint = self.checkpoint("manual");
        let bytes = self.checkpoints.serialize(&checkpoint.metadata.id)?;
        self.bus.emit(SimEvent::CheckpointCreated {
            checkpoint_id: checkpoint.metadata.id.clone(),
            step: checkpoint.metadata.step,
        });
        Ok(bytes)
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Captures the full simulation state as a plain data structure.
    pub fn capture_state(&self) -> SimulationState {
        let agents: Vec<Value> = self
            .agents
            .values()
            .map(|agent| serde_json::to_value(agent).unwrap_or(Value::Null))
            .collect();
        let agent_memories = self
            .memories
            .iter()
            .map(|(agent_id, memory)| (agent_id.clone(), memory.snapshot()))
            .collect();
        let app_states = self
            .apps
            .iter()
            .map(|(app_id, app)| {
                let blob = app
                    .snapshot()
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                    .unwrap_or(Value::Null);
                (app_id.clone(), blob)
            })
            .collect();

        SimulationState {
            simulation_id: self.id.clone(),
            step: self.current_step,
            name: self.config.name.clone(),
            status: self.status.to_string(),
            config: self.config.to_json(),
            agents,
            messages: self.messages.clone(),
            topology: self.topology.to_value(),
            agent_memories,
            app_states,
            metadata: Map::new(),
        }
    }

    /// Rebuilds a runnable simulation from serialized checkpoint bytes.
    pub fn restore(bytes: &[u8], provider: Arc<dyn LlmProvider>) -> Result<Self, SimError> {
        use crate::sim::checkpoint::CheckpointSerializer;
        let checkpoint = JsonCheckpointSerializer.deserialize(bytes)?;
        Self::from_state(checkpoint.state, provider)
    }

    /// Rebuilds a runnable simulation from a captured state.
    pub fn from_state(
        state: SimulationState,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, SimError> {
        let config = SimulationConfig::from_json(&state.config)
            .map_err(|e| SimError::Config(e.to_string()))?;
        let mut simulation = Simulation::new(config, provider);
        simulation.id = state.simulation_id.clone();
        simulation.bus.set_simulation_id(state.simulation_id.clone());
        simulation.current_step = state.step;
        simulation.status = match state.status.as_str() {
            "running" => SimulationStatus::Running,
            "paused" => SimulationStatus::Paused,
            "completed" => SimulationStatus::Completed,
            "cancelled" => SimulationStatus::Cancelled,
            "failed" => SimulationStatus::Failed,
            _ => SimulationStatus::Created,
        };

        for record in &state.agents {
            let agent: Agent = serde_json::from_value(record.clone())
                .map_err(|e| SimError::Config(format!("bad agent record: {}", e)))?;
            simulation.add_agent(agent);
        }
        for (agent_id, snapshot) in state.agent_memories {
            if let Some(memory) = simulation.memories.get_mut(&agent_id) {
                memory.restore(snapshot);
            }
        }

        simulation.topology = TopologyGraph::from_value(&state.topology)?;
        simulation.messages = state.messages;

        let agent_pairs: Vec<(String, String)> = simulation
            .agents
            .values()
            .map(|agent| (agent.id.clone(), agent.name.clone()))
            .collect();
        for (app_id, blob) in state.app_states {
            let mut app = simulation.registry.create_instance(&app_id)?;
            app.initialize(
                simulation.id.clone(),
                &agent_pairs,
                simulation.config.config_for_app(&app_id),
            );
            let bytes =
                serde_json::to_vec(&blob).map_err(|e| SimError::Config(e.to_string()))?;
            app.restore(&bytes)?;
            simulation.apps.insert(app_id, app);
        }

        // Topology and apps came from the snapshot; don't rebuild them.
        simulation.initialized = true;
        Ok(simulation)
    }
}
