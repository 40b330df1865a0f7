//! Action directive parser.
//!
//! Extracts `APP_ACTION: <app_id>.<action>(key=value, …)` directives from
//! free-form agent text. The prefix is case-insensitive; values are
//! JSON-literal-like tokens or bare tokens; commas inside quotes, brackets,
//! and braces do not split parameters. Recognized directive lines (and lines
//! that carry the prefix but fail to parse) are stripped from the returned
//! message text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static ACTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)APP_ACTION:\s*(\w+)\.(\w+)\(([^)]*)\)").expect("action pattern")
});

static ACTION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)APP_ACTION:").expect("prefix pattern"));

/// A well-formed directive extracted from a message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParsedAction {
    pub app_id: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub raw_text: String,
    pub line_number: Option<usize>,
}

/// One malformed directive line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub raw_text: String,
    pub line_number: Option<usize>,
}

/// Result of scanning a message: directives, errors, and the text with all
/// recognized directive lines removed (trimmed).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ParseResult {
    pub actions: Vec<ParsedAction>,
    pub errors: Vec<ParseError>,
    pub message_without_actions: String,
}

impl ParseResult {
    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Parses one parameter value token.
///
/// Quoted strings lose their quotes; numbers, booleans (`true`/`false`/
/// `yes`/`no`), null-likes (`null`/`none`), and JSON arrays/objects parse to
/// their values; anything else stays a bare string.
fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::String(String::new());
    }

    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let first = bytes[0] as char;
        let last = bytes[raw.len() - 1] as char;
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }

    match raw.to_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }

    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(f) {
            return Value::Number(number);
        }
    }

    Value::String(raw.to_string())
}

/// Splits the inside of the parentheses into key=value pairs.
///
/// Small state machine: commas only terminate a pair at depth zero and
/// outside quotes; bracket/brace depth is tracked so structured values keep
/// their internal commas.
fn parse_params(params_str: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if params_str.trim().is_empty() {
        return params;
    }

    let chars: Vec<char> = params_str.chars().collect();
    let mut current_key = String::new();
    let mut current_value = String::new();
    let mut in_string = false;
    let mut string_char = ' ';
    let mut depth: i32 = 0;
    let mut in_value = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            current_value.push(c);
            if c == string_char && (i == 0 || chars[i - 1] != '\\') {
                in_string = false;
            }
        } else if c == '"' || c == '\'' {
            in_string = true;
            string_char = c;
            current_value.push(c);
        } else if c == '[' || c == '{' || c == '(' {
            depth += 1;
            if in_value {
                current_value.push(c);
            }
        } else if c == ']' || c == '}' || c == ')' {
            depth -= 1;
            if in_value {
                current_value.push(c);
            }
        } else if c == '=' && !in_value && depth == 0 {
            in_value = true;
        } else if c == ',' && depth == 0 {
            if !current_key.trim().is_empty() {
                params.insert(current_key.trim().to_string(), parse_value(&current_value));
            }
            current_key.clear();
            current_value.clear();
            in_value = false;
        } else if in_value {
            current_value.push(c);
        } else {
            current_key.push(c);
        }
    }

    if !current_key.trim().is_empty() {
        params.insert(current_key.trim().to_string(), parse_value(&current_value));
    }

    params
}

/// Scans a message for directives.
///
/// Every line containing at least one well-formed directive contributes its
/// directives and is stripped. A line with the prefix but no well-formed
/// directive yields a [`ParseError`] and is also stripped.
pub fn parse_message(message: &str) -> ParseResult {
    let mut actions = Vec::new();
    let mut errors = Vec::new();
    let mut stripped_lines = std::collections::HashSet::new();

    let lines: Vec<&str> = message.split('\n').collect();
    for (index, line) in lines.iter().enumerate() {
        let line_number = index + 1;
        let matches: Vec<regex::Captures<'_>> = ACTION_PATTERN.captures_iter(line).collect();

        if !matches.is_empty() {
            for capture in matches {
                let raw = capture.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
                let app_id = capture[1].to_lowercase();
                let action = capture[2].to_string();
                let params = parse_params(&capture[3]);
                actions.push(ParsedAction {
                    app_id,
                    action,
                    params,
                    raw_text: raw,
                    line_number: Some(line_number),
                });
            }
            stripped_lines.insert(index);
        } else if ACTION_PREFIX.is_match(line) {
            errors.push(ParseError {
                message: "Invalid action directive syntax".to_string(),
                raw_text: line.trim().to_string(),
                line_number: Some(line_number),
            });
            stripped_lines.insert(index);
        }
    }

    let message_without_actions = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !stripped_lines.contains(i))
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    ParseResult {
        actions,
        errors,
        message_without_actions,
    }
}

/// Formats a directive string; the inverse of [`parse_message`] for one call.
pub fn format_action(app_id: &str, action: &str, params: &Map<String, Value>) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}=\"{}\"", key, s),
            other => format!("{}={}", key, other),
        })
        .collect();
    format!("APP_ACTION: {}.{}({})", app_id, action, rendered.join(", "))
}
