//! Declarative app model: definitions, actions, parameter specs, state
//! schema, and the logic statement sum type.
//!
//! One definition supports many instances. The statement list is a tagged
//! enum, so an unknown statement kind is a load-time (deserialize) error
//! rather than a runtime surprise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter value type for action parameters and schema fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Zero value for the type, used when a schema field has no default.
    pub fn zero_value(&self) -> Value {
        match self {
            ParamType::String => Value::String(String::new()),
            ParamType::Number => Value::from(0),
            ParamType::Boolean => Value::Bool(false),
            ParamType::Array => Value::Array(Vec::new()),
            ParamType::Object => Value::Object(serde_json::Map::new()),
        }
    }

    /// Whether `value` inhabits this type. Numbers accept both int and float.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One action parameter: type, required flag, default, and constraints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Regex the (string) value must match.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub enum_values: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default: None,
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Action classification used by goal checks and prompt rendering.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Read,
    Write,
    Confirm,
}

impl Default for ActionKind {
    fn default() -> Self {
        ActionKind::Write
    }
}

/// A value template inside a logic statement.
///
/// Every string leaf is an expression (quote literals inside: `"'sent'"`);
/// objects and arrays are evaluated recursively, anything else passes through
/// as a literal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LogicValue {
    Expr(String),
    Array(Vec<LogicValue>),
    Object(std::collections::BTreeMap<String, LogicValue>),
    Lit(Value),
}

impl LogicValue {
    pub fn expr(source: impl Into<String>) -> Self {
        LogicValue::Expr(source.into())
    }
}

/// One statement of an action's logic program. Execution is linear; `if`
/// selects a nested block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Evaluate `value` and write it to the state field addressed by `path`.
    Set { path: String, value: LogicValue },
    /// Evaluate `cond`; run `then` when truthy, `else` otherwise.
    If {
        cond: String,
        then: Vec<Statement>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Statement>,
    },
    /// End with success carrying the evaluated object as data.
    Return {
        object: std::collections::BTreeMap<String, LogicValue>,
    },
    /// End with failure. `message` is an interpolation template.
    Fail { message: String },
    /// Enqueue an observation for the agent `to_agent` evaluates to.
    /// `message` is an interpolation template; `data` an optional template.
    Observe {
        to_agent: String,
        message: String,
        #[serde(default)]
        data: Option<LogicValue>,
        #[serde(default)]
        priority: Option<i64>,
    },
    /// Append an interpolated line to the action audit log.
    Log { message: String },
    /// Bind a fresh unique id to a local name for later expressions.
    RandomId { binding: String },
}

/// One field of the app state schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: ParamType,
    /// True: one value per agent; false: a single shared value.
    #[serde(default)]
    pub per_agent: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl StateField {
    pub fn per_agent(name: impl Into<String>, field_type: ParamType, default: Value) -> Self {
        Self {
            name: name.into(),
            field_type,
            per_agent: true,
            default: Some(default),
        }
    }

    pub fn shared(name: impl Into<String>, field_type: ParamType, default: Value) -> Self {
        Self {
            name: name.into(),
            field_type,
            per_agent: false,
            default: Some(default),
        }
    }

    /// The field's default, falling back to the type's zero value.
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.field_type.zero_value())
    }
}

/// A named operation an app exposes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    /// Schema of the success payload, for prompt rendering.
    #[serde(default)]
    pub returns: Value,
    #[serde(default)]
    pub kind: ActionKind,
    pub logic: Vec<Statement>,
}

impl ActionDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Complete declarative description of a simulated app.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppDefinition {
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub state_schema: Vec<StateField>,
    #[serde(default)]
    pub initial_config: serde_json::Map<String, Value>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_active() -> bool {
    true
}

impl AppDefinition {
    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Parses the persisted wire form: either the flat shape or the envelope
    /// `{app_id, name, …, definition: {state_schema, initial_config, actions}}`.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        if let Some(inner) = value.get("definition") {
            let mut flat = value.clone();
            if let (Value::Object(target), Value::Object(body)) = (&mut flat, inner) {
                for (key, field) in body {
                    target.insert(key.clone(), field.clone());
                }
                target.remove("definition");
            }
            serde_json::from_value(flat)
        } else {
            serde_json::from_value(value.clone())
        }
    }

    /// Static consistency check: every field a `set` statement writes must be
    /// a schema field, an `agents[...]` slot of a schema field, or a local
    /// binding introduced earlier in the same action.
    pub fn validate(&self) -> Result<(), String> {
        let schema: std::collections::HashSet<&str> =
            self.state_schema.iter().map(|f| f.name.as_str()).collect();

        for action in &self.actions {
            let mut locals: std::collections::HashSet<String> = std::collections::HashSet::new();
            validate_block(&action.logic, &schema, &mut locals).map_err(|field| {
                format!(
                    "app '{}' action '{}' writes unknown state field '{}'",
                    self.app_id, action.name, field
                )
            })?;
        }
        Ok(())
    }
}

fn validate_block(
    block: &[Statement],
    schema: &std::collections::HashSet<&str>,
    locals: &mut std::collections::HashSet<String>,
) -> Result<(), String> {
    for statement in block {
        match statement {
            Statement::RandomId { binding } => {
                locals.insert(binding.clone());
            }
            Statement::Set { path, .. } => {
                let field = set_target_field(path);
                if let Some(field) = field {
                    if !schema.contains(field) && !locals.contains(field) {
                        return Err(field.to_string());
                    }
                }
            }
            Statement::If {
                then, otherwise, ..
            } => {
                validate_block(then, schema, locals)?;
                validate_block(otherwise, schema, locals)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Extracts the schema field a set path addresses: the segment after
/// `agent.` / `shared.` / `agents[...]`, or the bare leading name.
/// The agent reference may itself contain brackets, so the scan is
/// depth-aware.
fn set_target_field(path: &str) -> Option<&str> {
    let rest = if let Some(rest) = path.strip_prefix("agent.") {
        rest
    } else if let Some(rest) = path.strip_prefix("shared.") {
        rest
    } else if let Some(inner) = path.strip_prefix("agents[") {
        let mut depth = 1;
        let mut close = None;
        for (index, c) in inner.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(index);
                        break;
                    }
                }
                _ => {}
            }
        }
        inner[close? + 1..].strip_prefix('.')?
    } else {
        path
    };
    let end = rest
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: unknown statement kinds fail at deserialize time.
    #[test]
    fn unknown_statement_kind_is_load_error() {
        let result: Result<Statement, _> =
            serde_json::from_value(json!({"kind": "goto", "target": 3}));
        assert!(result.is_err());

        let ok: Statement =
            serde_json::from_value(json!({"kind": "fail", "message": "nope"})).unwrap();
        assert_eq!(
            ok,
            Statement::Fail {
                message: "nope".into()
            }
        );
    }

    /// **Scenario**: the enveloped wire form and the flat form both parse.
    #[test]
    fn definition_wire_forms() {
        let enveloped = json!({
            "app_id": "demo",
            "name": "Demo",
            "description": "",
            "category": "test",
            "icon": "",
            "version": "1.0",
            "is_active": true,
            "definition": {
                "state_schema": [
                    {"name": "count", "type": "number", "per_agent": true, "default": 0}
                ],
                "initial_config": {},
                "actions": []
            }
        });
        let parsed = AppDefinition::from_json(&enveloped).unwrap();
        assert_eq!(parsed.app_id, "demo");
        assert_eq!(parsed.state_schema.len(), 1);
        assert!(parsed.state_schema[0].per_agent);
    }

    /// **Scenario**: the static check flags writes to undeclared fields and
    /// accepts locals introduced by random_id.
    #[test]
    fn static_field_check() {
        let mut definition = AppDefinition {
            app_id: "demo".into(),
            name: "Demo".into(),
            description: String::new(),
            category: String::new(),
            icon: String::new(),
            version: "1.0".into(),
            is_active: true,
            state_schema: vec![StateField::per_agent("count", ParamType::Number, json!(0))],
            initial_config: serde_json::Map::new(),
            actions: vec![ActionDefinition {
                name: "bump".into(),
                description: String::new(),
                parameters: vec![],
                returns: Value::Null,
                kind: ActionKind::Write,
                logic: vec![Statement::Set {
                    path: "agent.count".into(),
                    value: LogicValue::expr("agent.count + 1"),
                }],
            }],
        };
        assert!(definition.validate().is_ok());

        definition.actions[0].logic.push(Statement::Set {
            path: "agent.missing".into(),
            value: LogicValue::expr("1"),
        });
        assert!(definition.validate().is_err());
    }

    /// **Scenario**: set_target_field resolves the addressed schema field.
    #[test]
    fn set_target_field_resolution() {
        assert_eq!(set_target_field("agent.balance"), Some("balance"));
        assert_eq!(set_target_field("shared.requests"), Some("requests"));
        assert_eq!(
            set_target_field("agents[params.to].balance"),
            Some("balance")
        );
        assert_eq!(
            set_target_field("shared.requests[params.id].status"),
            Some("requests")
        );
        assert_eq!(
            set_target_field("agents[shared.requests[params.id].payer].balance"),
            Some("balance")
        );
        assert_eq!(set_target_field("balance"), Some("balance"));
    }
}
