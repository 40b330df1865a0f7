//! Goal specs and the evaluator that checks them against simulation state.
//!
//! Conditions address app state by dotted path, the action audit log, agent
//! outputs, or handoff events. Numeric comparisons carry a small tolerance;
//! missing fields evaluate as not-met, never as an error; an expected-value
//! shape mismatch also counts not-met and logs a warning.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::apps::ActionLogEntry;

/// Comparison tolerance for numeric goal checks.
pub const NUMERIC_TOLERANCE: f64 = 1e-3;

/// Taxonomy of goal conditions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    StateEquals,
    StateContains,
    StateGreater,
    StateLess,
    StateExists,
    ActionExecuted,
    ActionSucceeded,
    HandoffCompleted,
    OutputContains,
}

/// One atomic success criterion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalCondition {
    pub goal_type: GoalType,
    #[serde(default)]
    pub description: String,
    /// For state/action conditions.
    #[serde(default)]
    pub app_id: Option<String>,
    /// Dotted path into the app state (maps and integer-indexed arrays).
    #[serde(default)]
    pub field_path: Option<String>,
    #[serde(default)]
    pub expected_value: Option<Value>,
    /// For handoff conditions.
    #[serde(default)]
    pub handoff_id: Option<String>,
    /// For output conditions.
    #[serde(default)]
    pub required_phrase: Option<String>,
}

impl GoalCondition {
    pub fn state_equals(
        app_id: impl Into<String>,
        field_path: impl Into<String>,
        expected: Value,
    ) -> Self {
        let app_id = app_id.into();
        let field_path = field_path.into();
        Self {
            goal_type: GoalType::StateEquals,
            description: format!("{}.{} equals expected value", app_id, field_path),
            app_id: Some(app_id),
            field_path: Some(field_path),
            expected_value: Some(expected),
            handoff_id: None,
            required_phrase: None,
        }
    }

    pub fn action_succeeded(app_id: impl Into<String>, action: impl Into<String>) -> Self {
        let app_id = app_id.into();
        let action = action.into();
        Self {
            goal_type: GoalType::ActionSucceeded,
            description: format!("{}.{} succeeded", app_id, action),
            app_id: Some(app_id),
            field_path: None,
            expected_value: Some(Value::String(action)),
            handoff_id: None,
            required_phrase: None,
        }
    }

    pub fn output_contains(phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        Self {
            goal_type: GoalType::OutputContains,
            description: format!("some output contains '{}'", phrase),
            app_id: None,
            field_path: None,
            expected_value: None,
            handoff_id: None,
            required_phrase: Some(phrase),
        }
    }
}

/// Aggregation mode over the conditions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuccessMode {
    #[default]
    All,
    Any,
}

/// A complete goal: conditions plus the aggregation mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GoalSpec {
    pub conditions: Vec<GoalCondition>,
    #[serde(default)]
    pub success_mode: SuccessMode,
    #[serde(default)]
    pub description: String,
}

/// Per-condition evaluation outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition: GoalCondition,
    pub met: bool,
    pub actual_value: Option<Value>,
    pub details: String,
}

/// Whole-spec evaluation outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalEvaluationResult {
    pub achieved: bool,
    pub condition_results: Vec<ConditionResult>,
    pub met_count: usize,
    pub total_count: usize,
    pub step_achieved: Option<u64>,
}

/// Everything the evaluator reads.
pub struct EvaluationInputs<'a> {
    /// `app_id -> state value` (shared fields at the top level, one entry per
    /// agent id).
    pub app_states: &'a HashMap<String, Value>,
    pub action_log: &'a [ActionLogEntry],
    pub agent_outputs: &'a [String],
    /// Completed handoff ids.
    pub handoffs: &'a [String],
    /// Step stamped into the result when the goal is achieved.
    pub step: Option<u64>,
}

/// Resolves a dotted path through maps and integer-indexed arrays.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Structural comparison with numeric tolerance.
pub fn compare_values(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Number(_), Value::Number(_)) => {
            match (expected.as_f64(), actual.as_f64()) {
                (Some(e), Some(a)) => (e - a).abs() <= NUMERIC_TOLERANCE,
                _ => expected == actual,
            }
        }
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len() && e.iter().zip(a).all(|(x, y)| compare_values(x, y))
        }
        (Value::Object(e), Value::Object(a)) => {
            e.len() == a.len()
                && e.iter().all(|(key, value)| {
                    a.get(key).map(|other| compare_values(value, other)).unwrap_or(false)
                })
        }
        _ => expected == actual,
    }
}

/// Evaluates a goal spec against the inputs.
pub fn evaluate(spec: &GoalSpec, inputs: &EvaluationInputs<'_>) -> GoalEvaluationResult {
    let condition_results: Vec<ConditionResult> = spec
        .conditions
        .iter()
        .map(|condition| evaluate_condition(condition, inputs))
        .collect();

    let met_count = condition_results.iter().filter(|r| r.met).count();
    let total_count = condition_results.len();
    let achieved = match spec.success_mode {
        SuccessMode::All => met_count == total_count,
        SuccessMode::Any => met_count > 0,
    };

    GoalEvaluationResult {
        achieved,
        condition_results,
        met_count,
        total_count,
        step_achieved: if achieved { inputs.step } else { None },
    }
}

fn evaluate_condition(
    condition: &GoalCondition,
    inputs: &EvaluationInputs<'_>,
) -> ConditionResult {
    let mut actual_value = None;
    let mut details = String::new();

    let met = match condition.goal_type {
        GoalType::StateEquals
        | GoalType::StateContains
        | GoalType::StateGreater
        | GoalType::StateLess
        | GoalType::StateExists => {
            let resolved = condition
                .app_id
                .as_deref()
                .and_then(|app_id| inputs.app_states.get(app_id))
                .and_then(|state| {
                    condition
                        .field_path
                        .as_deref()
                        .and_then(|path| resolve_path(state, path))
                });
            actual_value = resolved.cloned();
            match condition.goal_type {
                GoalType::StateExists => {
                    resolved.map(|value| !value.is_null()).unwrap_or(false)
                }
                _ => match (resolved, condition.expected_value.as_ref()) {
                    (Some(actual), Some(expected)) => {
                        check_state(condition.goal_type, expected, actual, &mut details)
                    }
                    (None, _) => {
                        details = "field not present".into();
                        false
                    }
                    (_, None) => {
                        details = "condition has no expected_value".into();
                        false
                    }
                },
            }
        }
        GoalType::ActionExecuted | GoalType::ActionSucceeded => {
            let action_name = condition
                .expected_value
                .as_ref()
                .and_then(|v| v.as_str())
                .or(condition.field_path.as_deref());
            match action_name {
                Some(action_name) => inputs.action_log.iter().any(|entry| {
                    entry.action == action_name
                        && condition
                            .app_id
                            .as_deref()
                            .map(|app_id| entry.app_id == app_id)
                            .unwrap_or(true)
                        && (condition.goal_type == GoalType::ActionExecuted || entry.success)
                }),
                None => {
                    details = "condition names no action".into();
                    false
                }
            }
        }
        GoalType::HandoffCompleted => condition
            .handoff_id
            .as_deref()
            .map(|handoff| inputs.handoffs.iter().any(|h| h == handoff))
            .unwrap_or(false),
        GoalType::OutputContains => condition
            .required_phrase
            .as_deref()
            .map(|phrase| {
                let phrase = phrase.to_lowercase();
                inputs
                    .agent_outputs
                    .iter()
                    .any(|output| output.to_lowercase().contains(&phrase))
            })
            .unwrap_or(false),
    };

    ConditionResult {
        condition: condition.clone(),
        met,
        actual_value,
        details,
    }
}

fn check_state(goal_type: GoalType, expected: &Value, actual: &Value, details: &mut String) -> bool {
    match goal_type {
        GoalType::StateEquals => compare_values(expected, actual),
        GoalType::StateContains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| compare_values(needle, item)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => {
                shape_mismatch(details, expected, actual);
                false
            }
        },
        GoalType::StateGreater | GoalType::StateLess => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => {
                    if goal_type == GoalType::StateGreater {
                        a > e + NUMERIC_TOLERANCE
                    } else {
                        a < e - NUMERIC_TOLERANCE
                    }
                }
                _ => {
                    shape_mismatch(details, expected, actual);
                    false
                }
            }
        }
        _ => false,
    }
}

fn shape_mismatch(details: &mut String, expected: &Value, actual: &Value) {
    *details = format!(
        "expected value shape mismatch: expected {:?}, actual {:?}",
        expected, actual
    );
    tracing::warn!(%details, "goal condition is ambiguous; counting as not met");
}
