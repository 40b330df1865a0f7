//! App instance runtime: lifecycle, parameter validation, action dispatch,
//! observation queues, audit log, snapshot/restore.
//!
//! One instance wires a definition to a concrete simulation. Actions run on a
//! working copy of the state; the copy is committed only on success, so a
//! failed action leaves no trace beyond its audit entry. The simulation
//! serializes access (one action per instance at a time), so the instance
//! itself holds plain data; only the observation queues use a concurrent map
//! because delivery happens from the PERCEIVE phase.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::apps::definition::{ActionDefinition, AppDefinition, ParamSpec};
use crate::apps::logic::{ExecutionContext, LogicEngine};
use crate::apps::state::AppState;
use crate::apps::{ActionResult, AppError, AppObservation};

/// One audit entry. Append-only; never rewritten after insertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub app_id: String,
    pub agent_id: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub success: bool,
    pub error: Option<String>,
    pub data: Value,
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub log_lines: Vec<String>,
}

/// A live app wired to one simulation.
pub struct AppInstance {
    definition: AppDefinition,
    engine: LogicEngine,
    state: AppState,
    config: Map<String, Value>,
    simulation_id: String,
    action_log: Vec<ActionLogEntry>,
    observations: DashMap<String, Vec<AppObservation>>,
    current_step: u64,
    episode_id: Option<String>,
    episode_step_count: u64,
}

impl AppInstance {
    /// Builds an instance after running the definition's static field check.
    pub fn new(definition: AppDefinition) -> Result<Self, AppError> {
        definition
            .validate()
            .map_err(AppError::Validation)?;
        Ok(Self {
            definition,
            engine: LogicEngine::new(),
            state: AppState::new(),
            config: Map::new(),
            simulation_id: String::new(),
            action_log: Vec::new(),
            observations: DashMap::new(),
            current_step: 0,
            episode_id: None,
            episode_step_count: 0,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.definition.app_id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn definition(&self) -> &AppDefinition {
        &self.definition
    }

    /// Materializes per-agent defaults, shared defaults, and the config
    /// overlay; registers the display-name map.
    pub fn initialize(
        &mut self,
        simulation_id: impl Into<String>,
        agents: &[(String, String)],
        config: Map<String, Value>,
    ) {
        self.simulation_id = simulation_id.into();
        self.state = AppState::new();
        self.action_log.clear();
        self.observations.clear();

        let mut merged = self.definition.initial_config.clone();
        for (key, value) in config {
            merged.insert(key, value);
        }

        let mut per_agent_defaults = Map::new();
        let mut shared_defaults = Map::new();
        for field in &self.definition.state_schema {
            let target = if field.per_agent {
                &mut per_agent_defaults
            } else {
                &mut shared_defaults
            };
            target.insert(field.name.clone(), field.default_value());
        }

        // Config keys override same-named schema fields; an `initial_<field>`
        // key seeds `<field>` (so `initial_balance` sets every balance).
        let overlay = |target: &mut Map<String, Value>| {
            for (key, value) in &merged {
                let field = key.strip_prefix("initial_").unwrap_or(key);
                if target.contains_key(field) {
                    target.insert(field.to_string(), value.clone());
                }
            }
        };

        for (agent_id, name) in agents {
            let mut slice = per_agent_defaults.clone();
            overlay(&mut slice);
            self.state.set_agent_state(agent_id.clone(), slice);
            self.state.register_agent_name(agent_id.clone(), name.clone());
        }

        let mut shared = shared_defaults;
        overlay(&mut shared);
        self.state.shared = shared;

        self.config = merged;
        tracing::info!(
            app = %self.definition.app_id,
            agents = agents.len(),
            "app initialized"
        );
    }

    /// The scheduler stamps the step before each batch so audit entries carry
    /// the step number they executed in.
    pub fn set_step(&mut self, step: u64) {
        self.current_step = step;
    }

    /// Materializes defaults for an agent that joined after initialization.
    pub fn add_agent(&mut self, agent_id: &str, name: &str) {
        if self.state.agent_state(agent_id).is_none() {
            let mut slice = Map::new();
            for field in &self.definition.state_schema {
                if field.per_agent {
                    slice.insert(field.name.clone(), field.default_value());
                }
            }
            for (key, value) in &self.config {
                let field = key.strip_prefix("initial_").unwrap_or(key);
                if slice.contains_key(field) {
                    slice.insert(field.to_string(), value.clone());
                }
            }
            self.state.set_agent_state(agent_id.to_string(), slice);
        }
        self.state.register_agent_name(agent_id.to_string(), name.to_string());
    }

    /// Validates params against the action's parameter specs.
    /// Returns the params with declared defaults filled in.
    pub fn validate_params(
        &self,
        action: &ActionDefinition,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, String> {
        let known: std::collections::HashSet<&str> =
            action.parameters.iter().map(|p| p.name.as_str()).collect();
        let mut unknown: Vec<&String> =
            params.keys().filter(|k| !known.contains(k.as_str())).collect();
        unknown.sort();
        if !unknown.is_empty() {
            let names: Vec<String> = unknown.into_iter().cloned().collect();
            return Err(format!("Unknown parameters: {}", names.join(", ")));
        }

        let mut effective = params.clone();
        for spec in &action.parameters {
            let value = params.get(&spec.name).filter(|v| !v.is_null());
            match value {
                None => {
                    if let Some(default) = &spec.default {
                        effective.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(format!("Parameter '{}' is required", spec.name));
                    }
                }
                Some(value) => {
                    check_param(spec, value)?;
                }
            }
        }
        Ok(effective)
    }

    /// Runs one action for one agent against live state.
    pub fn execute(
        &mut self,
        agent_id: &str,
        action_name: &str,
        params: Map<String, Value>,
    ) -> ActionResult {
        let action = match self.definition.action(action_name) {
            Some(action) => action.clone(),
            None => {
                let result = ActionResult::fail(format!("Unknown action: {}", action_name));
                self.append_log(agent_id, action_name, &params, &result, Vec::new());
                return result;
            }
        };

        let effective = match self.validate_params(&action, &params) {
            Ok(effective) => effective,
            Err(message) => {
                let result = ActionResult::fail(message);
                self.append_log(agent_id, action_name, &params, &result, Vec::new());
                return result;
            }
        };

        let mut working = self.state.deep_copy();
        working.ensure_agent(agent_id);
        let mut ctx = ExecutionContext::new(
            agent_id,
            effective,
            self.config.clone(),
            &mut working,
            &self.definition.state_schema,
        );

        let outcome = self.engine.execute(&action.logic, &mut ctx);
        let observations = std::mem::take(&mut ctx.observations);
        let log_lines = std::mem::take(&mut ctx.log_lines);
        drop(ctx);

        let result = match outcome {
            Ok(result) => result,
            Err(error) => ActionResult::fail(error.to_string()),
        };

        if result.success {
            self.state = working;
            for (to_agent, mut observation) in observations {
                observation.app_id = self.definition.app_id.clone();
                self.observations.entry(to_agent).or_default().push(observation);
            }
            if self.episode_id.is_some() {
                self.episode_step_count += 1;
            }
        }

        self.append_log(agent_id, action_name, &params, &result, log_lines);
        result
    }

    /// Runs the same logic on a deep copy without touching internal state.
    /// Used by the sandbox-test surface.
    pub fn execute_stateless(
        &self,
        agent_id: &str,
        action_name: &str,
        params: Map<String, Value>,
        state: &AppState,
        config: Option<Map<String, Value>>,
    ) -> (ActionResult, AppState, Vec<(String, AppObservation)>) {
        let action = match self.definition.action(action_name) {
            Some(action) => action.clone(),
            None => {
                return (
                    ActionResult::fail(format!("Unknown action: {}", action_name)),
                    state.deep_copy(),
                    Vec::new(),
                )
            }
        };

        let effective = match self.validate_params(&action, &params) {
            Ok(effective) => effective,
            Err(message) => return (ActionResult::fail(message), state.deep_copy(), Vec::new()),
        };

        let mut working = state.deep_copy();
        working.ensure_agent(agent_id);
        let config = config.unwrap_or_else(|| {
            let mut map = self.definition.initial_config.clone();
            for (key, value) in &self.config {
                map.insert(key.clone(), value.clone());
            }
            map
        });
        let mut ctx = ExecutionContext::new(
            agent_id,
            effective,
            config,
            &mut working,
            &self.definition.state_schema,
        );

        let result = match self.engine.execute(&action.logic, &mut ctx) {
            Ok(result) => result,
            Err(error) => ActionResult::fail(error.to_string()),
        };
        let mut observations = std::mem::take(&mut ctx.observations);
        drop(ctx);
        for (_, observation) in observations.iter_mut() {
            observation.app_id = self.definition.app_id.clone();
        }

        (result, working, observations)
    }

    /// The agent's slice plus shared state, flattened for prompts and tests.
    pub fn agent_view(&self, agent_id: &str) -> Value {
        let mut view = self
            .state
            .agent_state(agent_id)
            .cloned()
            .unwrap_or_default();
        for (key, value) in &self.state.shared {
            view.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(view)
    }

    /// The whole app state for goal evaluation: shared fields at the top
    /// level plus one entry per agent id.
    pub fn state_value(&self) -> Value {
        let mut map = self.state.shared.clone();
        for (agent_id, slice) in &self.state.per_agent {
            map.insert(agent_id.clone(), Value::Object(slice.clone()));
        }
        Value::Object(map)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Atomically removes and returns pending observations for an agent.
    pub fn pop_observations(&self, agent_id: &str) -> Vec<AppObservation> {
        self.observations
            .remove(agent_id)
            .map(|(_, queue)| queue)
            .unwrap_or_default()
    }

    /// Count of queued observations without draining them.
    pub fn pending_observations(&self, agent_id: &str) -> usize {
        self.observations
            .get(agent_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Audit entries, most recent first; optionally filtered by agent.
    pub fn action_log(&self, agent_id: Option<&str>) -> Vec<ActionLogEntry> {
        self.action_log
            .iter()
            .rev()
            .filter(|entry| agent_id.map(|id| entry.agent_id == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Raw audit log in append order.
    pub fn action_log_entries(&self) -> &[ActionLogEntry] {
        &self.action_log
    }

    /// Serializes state + audit log.
    pub fn snapshot(&self) -> Result<Vec<u8>, AppError> {
        let blob = json!({
            "state": self.state,
            "action_log": self.action_log,
            "config": self.config,
        });
        serde_json::to_vec(&blob).map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Restores state + audit log from [`Self::snapshot`] bytes.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        let blob: Value =
            serde_json::from_slice(bytes).map_err(|e| AppError::Storage(e.to_string()))?;
        self.state = serde_json::from_value(blob["state"].clone())
            .map_err(|e| AppError::Storage(e.to_string()))?;
        self.action_log = serde_json::from_value(blob["action_log"].clone())
            .map_err(|e| AppError::Storage(e.to_string()))?;
        if let Some(config) = blob["config"].as_object() {
            self.config = config.clone();
        }
        Ok(())
    }

    // -- episode plumbing (used by the environment wrapper) ----------------

    pub fn episode_id(&self) -> Option<&str> {
        self.episode_id.as_deref()
    }

    pub fn episode_step_count(&self) -> u64 {
        self.episode_step_count
    }

    pub fn in_episode(&self) -> bool {
        self.episode_id.is_some()
    }

    /// Starts a fresh episode: re-initializes and returns the first agent's
    /// initial observation.
    pub fn env_reset(
        &mut self,
        agents: &[(String, String)],
        config: Map<String, Value>,
    ) -> Value {
        let episode_id = format!("ep_{}", &uuid::Uuid::new_v4().to_string()[..8]);
        self.initialize(format!("episode:{}", episode_id), agents, config);
        self.episode_id = Some(episode_id);
        self.episode_step_count = 0;
        agents
            .first()
            .map(|(agent_id, _)| self.agent_view(agent_id))
            .unwrap_or(Value::Null)
    }

    /// Ends the episode and clears the episode fields.
    pub fn env_close(&mut self) {
        self.episode_id = None;
        self.episode_step_count = 0;
    }

    fn append_log(
        &mut self,
        agent_id: &str,
        action: &str,
        params: &Map<String, Value>,
        result: &ActionResult,
        log_lines: Vec<String>,
    ) {
        self.action_log.push(ActionLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: self.definition.app_id.clone(),
            agent_id: agent_id.to_string(),
            action: action.to_string(),
            params: params.clone(),
            success: result.success,
            error: result.error.clone(),
            data: result.data.clone(),
            step: self.current_step,
            timestamp: Utc::now(),
            log_lines,
        });
    }
}

fn check_param(spec: &ParamSpec, value: &Value) -> Result<(), String> {
    if !spec.param_type.matches(value) {
        return Err(format!(
            "Parameter '{}' must be {}",
            spec.name,
            spec.param_type.name()
        ));
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = spec.min_value {
            if number < min {
                return Err(format!("Parameter '{}' must be >= {}", spec.name, min));
            }
        }
        if let Some(max) = spec.max_value {
            if number > max {
                return Err(format!("Parameter '{}' must be <= {}", spec.name, max));
            }
        }
    }

    if let Some(text) = value.as_str() {
        if let Some(min) = spec.min_length {
            if text.chars().count() < min {
                return Err(format!(
                    "Parameter '{}' must be at least {} characters",
                    spec.name, min
                ));
            }
        }
        if let Some(max) = spec.max_length {
            if text.chars().count() > max {
                return Err(format!(
                    "Parameter '{}' must be at most {} characters",
                    spec.name, max
                ));
            }
        }
        if let Some(pattern) = &spec.pattern {
            let compiled = regex::Regex::new(pattern)
                .map_err(|_| format!("Parameter '{}' has an invalid pattern", spec.name))?;
            if !compiled.is_match(text) {
                return Err(format!(
                    "Parameter '{}' does not match pattern {}",
                    spec.name, pattern
                ));
            }
        }
    }

    if let Some(allowed) = &spec.enum_values {
        if !allowed.iter().any(|candidate| candidate == value) {
            return Err(format!(
                "Parameter '{}' must be one of {}",
                spec.name,
                serde_json::to_string(allowed).unwrap_or_default()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::definition::{ActionKind, LogicValue, ParamType, StateField, Statement};

    fn counter_app() -> AppDefinition {
        AppDefinition {
            app_id: "counter".into(),
            name: "Counter".into(),
            description: "counts".into(),
            category: "test".into(),
            icon: String::new(),
            version: "1.0".into(),
            is_active: true,
            state_schema: vec![
                StateField::per_agent("count", ParamType::Number, json!(0)),
                StateField::shared("total", ParamType::Number, json!(0)),
            ],
            initial_config: Map::new(),
            actions: vec![ActionDefinition {
                name: "bump".into(),
                description: "add to the counter".into(),
                parameters: vec![ParamSpec::new("by", ParamType::Number)
                    .required()
                    .with_range(Some(1.0), Some(10.0))],
                returns: Value::Null,
                kind: ActionKind::Write,
                logic: vec![
                    Statement::Set {
                        path: "agent.count".into(),
                        value: LogicValue::expr("agent.count + params.by"),
                    },
                    Statement::Set {
                        path: "shared.total".into(),
                        value: LogicValue::expr("shared.total + params.by"),
                    },
                    Statement::Return {
                        object: [("count".to_string(), LogicValue::expr("agent.count"))]
                            .into_iter()
                            .collect(),
                    },
                ],
            }],
        }
    }

    fn agents() -> Vec<(String, String)> {
        vec![
            ("alice".to_string(), "Alice".to_string()),
            ("bob".to_string(), "Bob".to_string()),
        ]
    }

    /// **Scenario**: initialize materializes per-agent defaults with config
    /// overlay applied to matching schema fields.
    #[test]
    fn initialize_applies_defaults_and_overlay() {
        let mut app = AppInstance::new(counter_app()).unwrap();
        let mut config = Map::new();
        config.insert("count".into(), json!(5));
        app.initialize("sim", &agents(), config);

        assert_eq!(app.agent_view("alice")["count"], json!(5));
        assert_eq!(app.agent_view("bob")["count"], json!(5));
        assert_eq!(app.state_value()["total"], json!(0));
    }

    /// **Scenario**: a successful action commits; validation failure leaves
    /// state untouched but still audits.
    #[test]
    fn execute_commits_or_rolls_back() {
        let mut app = AppInstance::new(counter_app()).unwrap();
        app.initialize("sim", &agents(), Map::new());

        let mut params = Map::new();
        params.insert("by".into(), json!(3));
        let result = app.execute("alice", "bump", params);
        assert!(result.success);
        assert_eq!(result.data["count"], json!(3));

        let mut params = Map::new();
        params.insert("by".into(), json!(99));
        let result = app.execute("alice", "bump", params);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("<= 10"));
        assert_eq!(app.agent_view("alice")["count"], json!(3));

        let log = app.action_log(None);
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert!(log[1].success);
    }

    /// **Scenario**: unknown parameters are rejected by name, sorted.
    #[test]
    fn unknown_params_rejected() {
        let mut app = AppInstance::new(counter_app()).unwrap();
        app.initialize("sim", &agents(), Map::new());

        let mut params = Map::new();
        params.insert("by".into(), json!(1));
        params.insert("zz".into(), json!(1));
        params.insert("aa".into(), json!(1));
        let result = app.execute("alice", "bump", params);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref().unwrap(),
            "Unknown parameters: aa, zz"
        );
    }

    /// **Scenario**: stateless execution never mutates the instance.
    #[test]
    fn stateless_execution_is_isolated() {
        let mut app = AppInstance::new(counter_app()).unwrap();
        app.initialize("sim", &agents(), Map::new());

        let mut params = Map::new();
        params.insert("by".into(), json!(4));
        let (result, new_state, _) =
            app.execute_stateless("alice", "bump", params, app.state(), None);
        assert!(result.success);
        assert_eq!(new_state.agent_state("alice").unwrap()["count"], json!(4));
        assert_eq!(app.agent_view("alice")["count"], json!(0));
    }

    /// **Scenario**: snapshot and restore round-trip state and audit log.
    #[test]
    fn snapshot_roundtrip() {
        let mut app = AppInstance::new(counter_app()).unwrap();
        app.initialize("sim", &agents(), Map::new());
        let mut params = Map::new();
        params.insert("by".into(), json!(2));
        app.execute("bob", "bump", params);

        let bytes = app.snapshot().unwrap();

        let mut restored = AppInstance::new(counter_app()).unwrap();
        restored.initialize("sim2", &agents(), Map::new());
        restored.restore(&bytes).unwrap();
        assert_eq!(restored.agent_view("bob")["count"], json!(2));
        assert_eq!(restored.action_log(None).len(), 1);
    }
}
