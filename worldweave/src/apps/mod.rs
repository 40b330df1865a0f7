//! Simulated apps: stateful mini-environments agents manipulate through
//! structured action directives.
//!
//! An [`AppDefinition`] is static data; an [`AppInstance`] wires one
//! definition to a concrete simulation with its own [`AppState`], audit log,
//! and per-recipient observation queues. Action behavior is a declarative
//! logic program interpreted by [`LogicEngine`] over the pure
//! [`expression`] language. [`parse_message`] extracts `APP_ACTION:`
//! directives from agent text; [`AppRegistry`] discovers native and
//! JSON-defined apps; [`AppEnvironment`] wraps one app in reset/step/close
//! episode semantics for RL-style clients.

pub mod definition;
pub mod environment;
pub mod expression;
pub mod logic;
pub mod parser;
pub mod paypal;
pub mod registry;
pub mod runtime;
pub mod state;

pub use definition::{
    ActionDefinition, ActionKind, AppDefinition, LogicValue, ParamSpec, ParamType, StateField,
    Statement,
};
pub use environment::{
    action_cost_reward, default_reward, sparse_reward, AppEnvironment, EpisodeHistory,
    ResetResult, RewardFn, StateSnapshot, StepOutcome,
};
pub use expression::{evaluate, interpolate, ExpressionError, ExpressionEvaluator};
pub use logic::{ExecutionContext, LogicEngine};
pub use parser::{format_action, parse_message, ParseError, ParseResult, ParsedAction};
pub use paypal::paypal_definition;
pub use registry::{AppRegistry, DefinitionStore, SqliteDefinitionStore};
pub use runtime::{ActionLogEntry, AppInstance};
pub use state::AppState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// App-layer failure kinds. Parameter validation and directive problems are
/// `Validation`; expression and statement failures roll state back.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("logic error: {0}")]
    LogicRuntime(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("unknown app: {0}")]
    UnknownApp(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Outcome of one action execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// A notification an app emits toward one agent. Delivered at the next step's
/// PERCEIVE phase, where it becomes a memory observation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppObservation {
    /// Filled by the runtime when the observation is queued.
    #[serde(default)]
    pub app_id: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

impl AppObservation {
    pub fn new(message: impl Into<String>, data: Value, priority: i64) -> Self {
        Self {
            app_id: String::new(),
            message: message.into(),
            data,
            priority,
            created_at: Utc::now(),
        }
    }
}
