//! Logic engine: interprets an action's statement list in a sandbox.
//!
//! The engine runs against a working copy of the app state held by the
//! [`ExecutionContext`]; the runtime commits the copy only when the result is
//! a success, which gives rollback-on-failure for free. Observations and log
//! lines accumulate in the context and are drained by the runtime.

use serde_json::{json, Map, Value};

use crate::apps::definition::{LogicValue, StateField, Statement};
use crate::apps::expression::{self, stringify, truthy, ExpressionError};
use crate::apps::state::AppState;
use crate::apps::{ActionResult, AppError, AppObservation};

/// Mutable execution scope for one action run.
pub struct ExecutionContext<'a> {
    pub agent_id: String,
    pub params: Map<String, Value>,
    pub config: Map<String, Value>,
    /// Working copy; the caller commits it on success.
    pub state: &'a mut AppState,
    pub schema: &'a [StateField],
    pub locals: Map<String, Value>,
    pub observations: Vec<(String, AppObservation)>,
    pub log_lines: Vec<String>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        agent_id: impl Into<String>,
        params: Map<String, Value>,
        config: Map<String, Value>,
        state: &'a mut AppState,
        schema: &'a [StateField],
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            params,
            config,
            state,
            schema,
            locals: Map::new(),
            observations: Vec::new(),
            log_lines: Vec::new(),
        }
    }

    /// Builds the expression environment from the current working state.
    ///
    /// `agents` is aliased by display name as well as id so logic can address
    /// either; `agent` carries the current agent's slice plus id and name.
    fn env(&self) -> Value {
        let mut agents = Map::new();
        for (agent_id, slice) in &self.state.per_agent {
            agents.insert(agent_id.clone(), Value::Object(slice.clone()));
        }
        for (name, agent_id) in &self.state.names {
            if !agents.contains_key(name) {
                if let Some(slice) = self.state.per_agent.get(agent_id) {
                    agents.insert(name.clone(), Value::Object(slice.clone()));
                }
            }
        }

        let mut agent_view = self
            .state
            .agent_state(&self.agent_id)
            .cloned()
            .unwrap_or_default();
        agent_view.insert("id".into(), json!(self.agent_id));
        if let Some(name) = self.display_name(&self.agent_id) {
            agent_view.insert("name".into(), json!(name));
        }

        let mut env = Map::new();
        env.insert("params".into(), Value::Object(self.params.clone()));
        env.insert("config".into(), Value::Object(self.config.clone()));
        env.insert("agent".into(), Value::Object(agent_view));
        env.insert("agents".into(), Value::Object(agents));
        env.insert("shared".into(), Value::Object(self.state.shared.clone()));
        for (name, value) in &self.locals {
            env.insert(name.clone(), value.clone());
        }
        Value::Object(env)
    }

    fn display_name(&self, agent_id: &str) -> Option<String> {
        self.state
            .names
            .iter()
            .find(|(_, id)| id.as_str() == agent_id)
            .map(|(name, _)| name.clone())
    }
}

enum Flow {
    Continue,
    Return(Map<String, Value>),
    Fail(String),
}

/// Interprets action logic programs. Stateless; one engine serves many apps.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogicEngine;

impl LogicEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs `logic` to completion. Expression and write errors surface as
    /// `Err`; an explicit `fail` statement is a successful run whose result
    /// has `success = false`. Either way the caller decides whether to commit
    /// the working copy.
    pub fn execute(
        &self,
        logic: &[Statement],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ActionResult, AppError> {
        match self.run_block(logic, ctx)? {
            Flow::Return(data) => Ok(ActionResult::ok(Value::Object(data))),
            Flow::Fail(message) => Ok(ActionResult::fail(message)),
            Flow::Continue => Ok(ActionResult::ok(Value::Object(Map::new()))),
        }
    }

    fn run_block(
        &self,
        block: &[Statement],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Flow, AppError> {
        for statement in block {
            match statement {
                Statement::Set { path, value } => {
                    let env = ctx.env();
                    let evaluated = eval_logic_value(value, &env)?;
                    write_state_path(ctx, path, evaluated, &env)?;
                }
                Statement::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let env = ctx.env();
                    let selected = if truthy(&expression::evaluate(cond, &env)?) {
                        then
                    } else {
                        otherwise
                    };
                    match self.run_block(selected, ctx)? {
                        Flow::Continue => {}
                        terminal => return Ok(terminal),
                    }
                }
                Statement::Return { object } => {
                    let env = ctx.env();
                    let mut data = Map::new();
                    for (key, value) in object {
                        data.insert(key.clone(), eval_logic_value(value, &env)?);
                    }
                    return Ok(Flow::Return(data));
                }
                Statement::Fail { message } => {
                    let env = ctx.env();
                    return Ok(Flow::Fail(expression::interpolate(message, &env)?));
                }
                Statement::Observe {
                    to_agent,
                    message,
                    data,
                    priority,
                } => {
                    let env = ctx.env();
                    let target = stringify(&expression::evaluate(to_agent, &env)?);
                    let target = ctx.state.resolve_agent(&target).unwrap_or(target);
                    let rendered = expression::interpolate(message, &env)?;
                    let payload = match data {
                        Some(value) => eval_logic_value(value, &env)?,
                        None => Value::Null,
                    };
                    ctx.observations.push((
                        target,
                        AppObservation::new(rendered, payload, priority.unwrap_or(0)),
                    ));
                }
                Statement::Log { message } => {
                    let env = ctx.env();
                    ctx.log_lines.push(expression::interpolate(message, &env)?);
                }
                Statement::RandomId { binding } => {
                    ctx.locals
                        .insert(binding.clone(), json!(uuid::Uuid::new_v4().to_string()));
                }
            }
        }
        Ok(Flow::Continue)
    }
}

fn eval_logic_value(value: &LogicValue, env: &Value) -> Result<Value, ExpressionError> {
    match value {
        LogicValue::Expr(source) => expression::evaluate(source, env),
        LogicValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_logic_value(item, env)?);
            }
            Ok(Value::Array(out))
        }
        LogicValue::Object(fields) => {
            let mut map = Map::new();
            for (key, field) in fields {
                map.insert(key.clone(), eval_logic_value(field, env)?);
            }
            Ok(Value::Object(map))
        }
        LogicValue::Lit(value) => Ok(value.clone()),
    }
}

/// One parsed segment of a set path.
enum WriteSeg {
    Name(String),
    /// Bracketed key: the expression source between `[` and `]`.
    Key(String),
}

fn parse_write_path(path: &str) -> Result<Vec<WriteSeg>, AppError> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => i += 1,
            '[' => {
                let mut depth = 1;
                let mut j = i + 1;
                let mut in_string: Option<char> = None;
                while j < chars.len() {
                    let c = chars[j];
                    match in_string {
                        Some(quote) => {
                            if c == quote {
                                in_string = None;
                            }
                        }
                        None => match c {
                            '\'' | '"' => in_string = Some(c),
                            '[' => depth += 1,
                            ']' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        },
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(AppError::LogicRuntime(format!(
                        "unbalanced brackets in set path '{}'",
                        path
                    )));
                }
                let inner: String = chars[i + 1..j].iter().collect();
                segments.push(WriteSeg::Key(inner));
                i = j + 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                segments.push(WriteSeg::Name(name));
            }
        }
    }

    if segments.is_empty() {
        return Err(AppError::LogicRuntime("empty set path".into()));
    }
    Ok(segments)
}

/// Writes `value` at `path` in the working state. The root routes the write:
/// `agent.` to the current agent, `agents[ref].` through the name resolver,
/// `shared.` to shared state, and a bare schema field per its `per_agent`
/// flag. Intermediate objects are created on demand.
fn write_state_path(
    ctx: &mut ExecutionContext<'_>,
    path: &str,
    value: Value,
    env: &Value,
) -> Result<(), AppError> {
    let segments = parse_write_path(path)?;
    let mut keys: Vec<String> = Vec::new();
    let mut iter = segments.into_iter();

    let root = match iter.next() {
        Some(WriteSeg::Name(name)) => name,
        _ => {
            return Err(AppError::LogicRuntime(format!(
                "set path must start with a name: '{}'",
                path
            )))
        }
    };

    // Resolve the container the write lands in.
    enum Target {
        Agent(String),
        Shared,
    }
    let target = match root.as_str() {
        "agent" => Target::Agent(ctx.agent_id.clone()),
        "shared" => Target::Shared,
        "agents" => {
            let key_expr = match iter.next() {
                Some(WriteSeg::Key(expr)) => expr,
                _ => {
                    return Err(AppError::LogicRuntime(format!(
                        "'agents' requires a bracketed agent reference: '{}'",
                        path
                    )))
                }
            };
            let reference = stringify(&expression::evaluate(&key_expr, env)?);
            let agent_id = ctx.state.resolve_agent(&reference).ok_or_else(|| {
                AppError::LogicRuntime(format!("unknown agent '{}' in set path", reference))
            })?;
            Target::Agent(agent_id)
        }
        _ => {
            // Bare schema field: route by its per_agent flag.
            let field = ctx.schema.iter().find(|f| f.name == root);
            keys.push(root.clone());
            match field {
                Some(f) if !f.per_agent => Target::Shared,
                _ => Target::Agent(ctx.agent_id.clone()),
            }
        }
    };

    for segment in iter {
        match segment {
            WriteSeg::Name(name) => keys.push(name),
            WriteSeg::Key(expr) => keys.push(stringify(&expression::evaluate(&expr, env)?)),
        }
    }
    if keys.is_empty() {
        return Err(AppError::LogicRuntime(format!(
            "set path addresses no field: '{}'",
            path
        )));
    }

    let container = match target {
        Target::Agent(agent_id) => ctx.state.ensure_agent(&agent_id),
        Target::Shared => &mut ctx.state.shared,
    };
    write_keys(container, &keys, value);
    Ok(())
}

fn write_keys(container: &mut Map<String, Value>, keys: &[String], value: Value) {
    if keys.len() == 1 {
        container.insert(keys[0].clone(), value);
        return;
    }
    let slot = container
        .entry(keys[0].clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(inner) = slot {
        write_keys(inner, &keys[1..], value);
    }
}
