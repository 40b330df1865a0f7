//! # Worldweave
//!
//! An orchestration engine for multi-agent conversational simulations with
//! pluggable, stateful apps. The engine runs discrete steps, drives
//! LLM-backed agents through a communication topology, executes app
//! transitions in response to parsed `APP_ACTION:` directives, and evaluates
//! goals and pass^k reliability across repeated runs.
//!
//! ## Main modules
//!
//! - [`sim`]: [`Simulation`] runner, step scheduler (PERCEIVE → ACT →
//!   COMMIT), [`SimulationController`] signals, checkpoint engine, event bus.
//! - [`agent`]: [`Agent`] identity and five-trait personality.
//! - [`memory`]: dual-store memory per agent — observations, reflections,
//!   scored retrieval, retention.
//! - [`topology`]: [`TopologyGraph`] builders, routing modes, metrics,
//!   centrality.
//! - [`apps`]: declarative app runtime — [`AppDefinition`], the expression
//!   and logic engines, the directive [`parser`](apps::parser), the
//!   registry, and the RL-style [`AppEnvironment`] episode wrapper.
//! - [`llm`]: the [`LlmGateway`] (caching, retry, seeding, audit) over the
//!   [`LlmProvider`] trait, with [`MockProvider`] and [`OpenAiProvider`].
//! - [`goals`]: [`GoalSpec`] evaluation against state, actions, and outputs.
//! - [`eval`]: pass^k reliability metrics and comparisons.
//!
//! Events are emitted as [`sim_event::SimEvent`] envelopes via a
//! non-blocking fan-out bus; external observers (persistence, WebSocket)
//! subscribe without ever stalling the step loop.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worldweave::agent::{Agent, TraitVector};
//! use worldweave::llm::MockProvider;
//! use worldweave::sim::{Simulation, SimulationConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), worldweave::sim::SimError> {
//! let mut config = SimulationConfig::named("demo");
//! config.apps = vec!["paypal".to_string()];
//!
//! let provider = Arc::new(MockProvider::new("Hello there!"));
//! let mut simulation = Simulation::new(config, provider);
//! simulation.add_agent(Agent::new("alice", TraitVector::default()));
//! simulation.add_agent(Agent::new("bob", TraitVector::default()));
//!
//! let results = simulation.run(5).await?;
//! println!("ran {} steps", results.len());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod apps;
pub mod eval;
pub mod goals;
pub mod llm;
pub mod memory;
pub mod message;
pub mod sim;
pub mod topology;

pub use agent::{Agent, TraitVector};
pub use apps::{
    ActionResult, AppDefinition, AppEnvironment, AppInstance, AppRegistry, ParseResult,
};
pub use goals::{GoalCondition, GoalSpec, SuccessMode};
pub use llm::{CompletionRequest, LlmGateway, LlmProvider, MockProvider, OpenAiProvider};
pub use memory::{MemoryStore, Observation, Reflection};
pub use message::Message;
pub use sim::{Simulation, SimulationConfig, SimulationController, StepResult};
pub use topology::{RoutingMode, TopologyGraph, TopologySpec};
