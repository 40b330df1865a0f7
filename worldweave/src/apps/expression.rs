//! Pure expression language for declarative app logic.
//!
//! Parses once (AST cached by source text), evaluates by walking the tree
//! against a JSON environment. Missing paths yield null, never an error;
//! syntax problems, unknown functions, and division by zero raise
//! [`ExpressionError`]. Evaluation is side-effect free: the only inputs are
//! the source and the environment map.
//!
//! Grammar (precedence climbing): `||` < `&&` < `==`/`!=` < `<`/`<=`/`>`/`>=`
//! < `+`/`-` < `*`/`/` < unary `!`/`-` < primary. Primaries are literals,
//! dotted/bracketed paths, calls, parenthesized expressions, and array/object
//! literals (logic programs build records with these).
//!
//! A separate entry point, [`interpolate`], renders `"…${expr}…"` templates;
//! a `$` not followed by `{` passes through verbatim.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Expression failure. Action logic that hits one of these fails the action
/// and rolls state back.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{name}() expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Path(Vec<PathSeg>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum PathSeg {
    Name(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

fn lex(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        s.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(ExpressionError::Syntax("unterminated string".into()));
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                } else if i < chars.len() && chars[i] == '.' && i + 1 == chars.len() {
                    // Trailing "1." counts as a float literal.
                    is_float = true;
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| ExpressionError::Syntax(format!("bad number: {}", text)))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| ExpressionError::Syntax(format!("bad number: {}", text)))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(word));
            }
            _ => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let punct = match two.as_str() {
                    "||" | "&&" | "==" | "!=" | "<=" | ">=" => {
                        i += 2;
                        match two.as_str() {
                            "||" => "||",
                            "&&" => "&&",
                            "==" => "==",
                            "!=" => "!=",
                            "<=" => "<=",
                            _ => ">=",
                        }
                    }
                    _ => {
                        i += 1;
                        match c {
                            '<' => "<",
                            '>' => ">",
                            '+' => "+",
                            '-' => "-",
                            '*' => "*",
                            '/' => "/",
                            '!' => "!",
                            '(' => "(",
                            ')' => ")",
                            '[' => "[",
                            ']' => "]",
                            '{' => "{",
                            '}' => "}",
                            ',' => ",",
                            '.' => ".",
                            ':' => ":",
                            other => {
                                return Err(ExpressionError::Syntax(format!(
                                    "unexpected character: {}",
                                    other
                                )))
                            }
                        }
                    }
                };
                tokens.push(Token::Punct(punct));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ExpressionError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(ExpressionError::Syntax(format!(
                "expected '{}', found {:?}",
                punct,
                self.peek()
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_eq()?;
        while self.eat_punct("&&") {
            let right = self.parse_eq()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_eq(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_rel()?;
        loop {
            let op = if self.eat_punct("==") {
                BinOp::Eq
            } else if self.eat_punct("!=") {
                BinOp::Ne
            } else {
                break;
            };
            let right = self.parse_rel()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_rel(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_add()?;
        loop {
            let op = if self.eat_punct("<=") {
                BinOp::Le
            } else if self.eat_punct(">=") {
                BinOp::Ge
            } else if self.eat_punct("<") {
                BinOp::Lt
            } else if self.eat_punct(">") {
                BinOp::Gt
            } else {
                break;
            };
            let right = self.parse_add()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = if self.eat_punct("+") {
                BinOp::Add
            } else if self.eat_punct("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_mul()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinOp::Mul
            } else if self.eat_punct("/") {
                BinOp::Div
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_punct("!") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_punct("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ => {
                    if self.eat_punct("(") {
                        let args = self.parse_args(")")?;
                        Ok(Expr::Call(word, args))
                    } else {
                        self.parse_path_tail(word)
                    }
                }
            },
            Some(Token::Punct("(")) => {
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => {
                let items = self.parse_args("]")?;
                Ok(Expr::Array(items))
            }
            Some(Token::Punct("{")) => {
                let mut fields = Vec::new();
                if !self.eat_punct("}") {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(k)) => k,
                            Some(Token::Str(k)) => k,
                            other => {
                                return Err(ExpressionError::Syntax(format!(
                                    "expected object key, found {:?}",
                                    other
                                )))
                            }
                        };
                        self.expect_punct(":")?;
                        let value = self.parse_expr()?;
                        fields.push((key, value));
                        if self.eat_punct("}") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(fields))
            }
            other => Err(ExpressionError::Syntax(format!(
                "unexpected token: {:?}",
                other
            ))),
        }
    }

    fn parse_args(&mut self, close: &'static str) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat_punct(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat_punct(close) {
                break;
            }
            self.expect_punct(",")?;
        }
        Ok(args)
    }

    fn parse_path_tail(&mut self, root: String) -> Result<Expr, ExpressionError> {
        let mut segments = vec![PathSeg::Name(root)];
        loop {
            if self.eat_punct(".") {
                match self.next() {
                    Some(Token::Ident(name)) => segments.push(PathSeg::Name(name)),
                    other => {
                        return Err(ExpressionError::Syntax(format!(
                            "expected field name after '.', found {:?}",
                            other
                        )))
                    }
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                segments.push(PathSeg::Index(Box::new(index)));
            } else {
                break;
            }
        }
        Ok(Expr::Path(segments))
    }
}

fn parse(source: &str) -> Result<Arc<Expr>, ExpressionError> {
    static AST_CACHE: Lazy<Mutex<HashMap<String, Arc<Expr>>>> =
        Lazy::new(|| Mutex::new(HashMap::new()));

    if let Some(cached) = AST_CACHE.lock().expect("ast cache poisoned").get(source) {
        return Ok(Arc::clone(cached));
    }

    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExpressionError::Syntax(format!(
            "trailing input at token {}",
            parser.pos
        )));
    }

    let expr = Arc::new(expr);
    AST_CACHE
        .lock()
        .expect("ast cache poisoned")
        .insert(source.to_string(), Arc::clone(&expr));
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Truthiness: null and empty containers are false, numbers by non-zero,
/// strings by non-empty.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a value for interpolation and `str()`: strings unquoted, integers
/// without a decimal point, containers as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric equality across int/float, structural everywhere else.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn numeric_pair(a: &Value, b: &Value, op: &str) -> Result<(f64, f64), ExpressionError> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ExpressionError::Type(format!(
            "'{}' needs numeric operands, got {} and {}",
            op,
            type_name(a),
            type_name(b)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn both_ints(a: &Value, b: &Value) -> Option<(i64, i64)> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) if a.is_i64() && b.is_i64() => Some((x, y)),
        _ => None,
    }
}

fn number_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn eval_expr(expr: &Expr, env: &Value) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Int(n) => Ok(json!(n)),
        Expr::Float(f) => Ok(number_value(*f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, env)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval_expr(value, env)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Path(segments) => eval_path(segments, env),
        Expr::Call(name, args) => eval_call(name, args, env),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval_expr(inner, env)?))),
        Expr::Neg(inner) => {
            let value = eval_expr(inner, env)?;
            if let Some(i) = value.as_i64() {
                if value.is_i64() {
                    return Ok(json!(-i));
                }
            }
            match as_number(&value) {
                Some(f) => Ok(number_value(-f)),
                None => Err(ExpressionError::Type(format!(
                    "cannot negate {}",
                    type_name(&value)
                ))),
            }
        }
        Expr::Binary(op, left, right) => {
            let l = eval_expr(left, env)?;
            match op {
                BinOp::Or => {
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = eval_expr(right, env)?;
                    Ok(Value::Bool(truthy(&r)))
                }
                BinOp::And => {
                    if !truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = eval_expr(right, env)?;
                    Ok(Value::Bool(truthy(&r)))
                }
                _ => {
                    let r = eval_expr(right, env)?;
                    eval_binary(*op, &l, &r)
                }
            }
        }
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(value_eq(l, r))),
        BinOp::Ne => Ok(Value::Bool(!value_eq(l, r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if let (Value::String(a), Value::String(b)) = (l, r) {
                let ordering = a.cmp(b);
                return Ok(Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }));
            }
            let (x, y) = numeric_pair(l, r, "compare")?;
            Ok(Value::Bool(match op {
                BinOp::Lt => x < y,
                BinOp::Le => x <= y,
                BinOp::Gt => x > y,
                _ => x >= y,
            }))
        }
        BinOp::Add => {
            if let (Value::String(a), Value::String(b)) = (l, r) {
                return Ok(Value::String(format!("{}{}", a, b)));
            }
            if let Some((a, b)) = both_ints(l, r) {
                return Ok(json!(a + b));
            }
            let (x, y) = numeric_pair(l, r, "+")?;
            Ok(number_value(x + y))
        }
        BinOp::Sub => {
            if let Some((a, b)) = both_ints(l, r) {
                return Ok(json!(a - b));
            }
            let (x, y) = numeric_pair(l, r, "-")?;
            Ok(number_value(x - y))
        }
        BinOp::Mul => {
            if let Some((a, b)) = both_ints(l, r) {
                return Ok(json!(a * b));
            }
            let (x, y) = numeric_pair(l, r, "*")?;
            Ok(number_value(x * y))
        }
        BinOp::Div => {
            let (x, y) = numeric_pair(l, r, "/")?;
            if y == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            if let Some((a, b)) = both_ints(l, r) {
                if b != 0 && a % b == 0 {
                    return Ok(json!(a / b));
                }
            }
            Ok(number_value(x / y))
        }
        BinOp::Or | BinOp::And => unreachable!("short-circuit ops handled by caller"),
    }
}

fn eval_path(segments: &[PathSeg], env: &Value) -> Result<Value, ExpressionError> {
    let mut current = env;
    for segment in segments {
        let next = match segment {
            PathSeg::Name(name) => current.get(name.as_str()),
            PathSeg::Index(index_expr) => {
                let key = eval_expr(index_expr, env)?;
                match (current, &key) {
                    (Value::Object(map), Value::String(s)) => map.get(s),
                    (Value::Object(map), other) => map.get(&stringify(other)),
                    (Value::Array(items), key) => key
                        .as_i64()
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| items.get(i)),
                    _ => None,
                }
            }
        };
        match next {
            // Missing intermediate fields resolve to null, never an error.
            None => return Ok(Value::Null),
            Some(value) => current = value,
        }
    }
    Ok(current.clone())
}

fn expect_args(name: &str, args: &[Value], expected: usize) -> Result<(), ExpressionError> {
    if args.len() != expected {
        Err(ExpressionError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    } else {
        Ok(())
    }
}

fn eval_call(name: &str, raw_args: &[Expr], env: &Value) -> Result<Value, ExpressionError> {
    let mut args = Vec::with_capacity(raw_args.len());
    for arg in raw_args {
        args.push(eval_expr(arg, env)?);
    }

    match name {
        "len" => {
            expect_args(name, &args, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(ExpressionError::Type(format!(
                        "len() of {}",
                        type_name(other)
                    )))
                }
            };
            Ok(json!(n))
        }
        "contains" => {
            expect_args(name, &args, 2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(haystack), needle) => {
                    haystack.contains(&stringify(needle))
                }
                (Value::Array(items), needle) => items.iter().any(|item| value_eq(item, needle)),
                (Value::Object(map), key) => map.contains_key(&stringify(key)),
                (Value::Null, _) => false,
                (other, _) => {
                    return Err(ExpressionError::Type(format!(
                        "contains() on {}",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
        "lower" => {
            expect_args(name, &args, 1)?;
            Ok(Value::String(stringify(&args[0]).to_lowercase()))
        }
        "upper" => {
            expect_args(name, &args, 1)?;
            Ok(Value::String(stringify(&args[0]).to_uppercase()))
        }
        "str" => {
            expect_args(name, &args, 1)?;
            Ok(Value::String(stringify(&args[0])))
        }
        "num" => {
            expect_args(name, &args, 1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(n.clone())),
                Value::String(s) => {
                    if let Ok(i) = s.trim().parse::<i64>() {
                        Ok(json!(i))
                    } else if let Ok(f) = s.trim().parse::<f64>() {
                        Ok(number_value(f))
                    } else {
                        Err(ExpressionError::Type(format!("num() of '{}'", s)))
                    }
                }
                Value::Bool(b) => Ok(json!(if *b { 1 } else { 0 })),
                other => Err(ExpressionError::Type(format!(
                    "num() of {}",
                    type_name(other)
                ))),
            }
        }
        "bool" => {
            expect_args(name, &args, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "round" => {
            expect_args(name, &args, 1)?;
            let x = as_number(&args[0]).ok_or_else(|| {
                ExpressionError::Type(format!("round() of {}", type_name(&args[0])))
            })?;
            Ok(json!(x.round() as i64))
        }
        "abs" => {
            expect_args(name, &args, 1)?;
            if args[0].is_i64() {
                return Ok(json!(args[0].as_i64().unwrap_or(0).abs()));
            }
            let x = as_number(&args[0]).ok_or_else(|| {
                ExpressionError::Type(format!("abs() of {}", type_name(&args[0])))
            })?;
            Ok(number_value(x.abs()))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: 1,
                    got: 0,
                });
            }
            let all_ints = args.iter().all(|a| a.is_i64());
            let mut best = as_number(&args[0]).ok_or_else(|| {
                ExpressionError::Type(format!("{}() of {}", name, type_name(&args[0])))
            })?;
            for arg in &args[1..] {
                let x = as_number(arg).ok_or_else(|| {
                    ExpressionError::Type(format!("{}() of {}", name, type_name(arg)))
                })?;
                best = if name == "min" { best.min(x) } else { best.max(x) };
            }
            if all_ints {
                Ok(json!(best as i64))
            } else {
                Ok(number_value(best))
            }
        }
        "append" => {
            expect_args(name, &args, 2)?;
            let mut items = match &args[0] {
                Value::Array(items) => items.clone(),
                Value::Null => Vec::new(),
                other => {
                    return Err(ExpressionError::Type(format!(
                        "append() to {}",
                        type_name(other)
                    )))
                }
            };
            items.push(args[1].clone());
            Ok(Value::Array(items))
        }
        "generate_id" => {
            expect_args(name, &args, 0)?;
            Ok(Value::String(uuid::Uuid::new_v4().to_string()))
        }
        "timestamp" => {
            expect_args(name, &args, 0)?;
            Ok(Value::String(chrono::Utc::now().to_rfc3339()))
        }
        "now" => {
            expect_args(name, &args, 0)?;
            Ok(json!(chrono::Utc::now().timestamp()))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Evaluates `source` against a JSON object environment.
pub fn evaluate(source: &str, env: &Value) -> Result<Value, ExpressionError> {
    let ast = parse(source)?;
    eval_expr(&ast, env)
}

/// Renders a `"…${expr}…"` template. A `$` not immediately followed by `{`
/// passes through verbatim, so `$$100` stays `$$100` while `$${amount}`
/// renders a literal `$` followed by the amount.
pub fn interpolate(template: &str, env: &Value) -> Result<String, ExpressionError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '{' {
            let mut depth = 1;
            let mut j = i + 2;
            let mut expr = String::new();
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
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    },
                }
                expr.push(c);
                j += 1;
            }
            if depth != 0 {
                return Err(ExpressionError::Syntax(
                    "unterminated ${...} in template".into(),
                ));
            }
            let value = evaluate(expr.trim(), env)?;
            out.push_str(&stringify(&value));
            i = j + 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    Ok(out)
}

/// Thin object wrapper over [`evaluate`] / [`interpolate`] for callers that
/// want to hold an evaluator handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, source: &str, env: &Value) -> Result<Value, ExpressionError> {
        evaluate(source, env)
    }

    pub fn evaluate_interpolated(
        &self,
        template: &str,
        env: &Value,
    ) -> Result<String, ExpressionError> {
        interpolate(template, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: integer arithmetic stays integral, mixed goes float.
    #[test]
    fn arithmetic_preserves_intness() {
        let env = json!({});
        assert_eq!(evaluate("2 + 3 * 4", &env).unwrap(), json!(14));
        assert_eq!(evaluate("10 / 2", &env).unwrap(), json!(5));
        assert_eq!(evaluate("7 / 2", &env).unwrap(), json!(3.5));
        assert_eq!(evaluate("(2 + 3) * 4", &env).unwrap(), json!(20));
    }

    /// **Scenario**: missing paths are null, never errors, even nested.
    #[test]
    fn missing_paths_are_null() {
        let env = json!({"user": {"name": "Alice"}});
        assert_eq!(evaluate("user.age", &env).unwrap(), Value::Null);
        assert_eq!(evaluate("user.address.city", &env).unwrap(), Value::Null);
        assert_eq!(evaluate("missing", &env).unwrap(), Value::Null);
    }

    /// **Scenario**: bracket access works with literals, variables, and indices.
    #[test]
    fn bracket_access() {
        let env = json!({
            "users": {"alice": {"balance": 100}, "bob": 200},
            "key": "alice",
            "items": [10, 20, 30],
        });
        assert_eq!(evaluate("users['alice'].balance", &env).unwrap(), json!(100));
        assert_eq!(evaluate("users[key].balance", &env).unwrap(), json!(100));
        assert_eq!(evaluate("items[1]", &env).unwrap(), json!(20));
        assert_eq!(evaluate("items[9]", &env).unwrap(), Value::Null);
    }

    /// **Scenario**: `!!x` yields a bool mirroring truthiness.
    #[test]
    fn double_negation_is_bool() {
        let env = json!({"x": "nonempty", "y": 0});
        assert_eq!(evaluate("!!x", &env).unwrap(), json!(true));
        assert_eq!(evaluate("!!y", &env).unwrap(), json!(false));
    }

    /// **Scenario**: division by zero and unknown functions are errors.
    #[test]
    fn error_kinds() {
        let env = json!({});
        assert_eq!(
            evaluate("10 / 0", &env).unwrap_err(),
            ExpressionError::DivisionByZero
        );
        assert!(matches!(
            evaluate("unknown_func()", &env).unwrap_err(),
            ExpressionError::UnknownFunction(_)
        ));
        assert!(matches!(
            evaluate("2 +", &env).unwrap_err(),
            ExpressionError::Syntax(_)
        ));
    }

    /// **Scenario**: object and array literals evaluate their leaves.
    #[test]
    fn container_literals() {
        let env = json!({"a": 1, "b": 2});
        assert_eq!(
            evaluate("[a, b, a + b]", &env).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            evaluate("{x: a, 'y': b * 10}", &env).unwrap(),
            json!({"x": 1, "y": 20})
        );
    }

    /// **Scenario**: interpolation substitutes ${expr} and leaves $$ alone.
    #[test]
    fn interpolation_rules() {
        let env = json!({"name": "Alice", "amount": 50});
        assert_eq!(
            interpolate("Hello ${name}!", &env).unwrap(),
            "Hello Alice!"
        );
        assert_eq!(
            interpolate("Amount: $${amount}", &env).unwrap(),
            "Amount: $50"
        );
        assert_eq!(interpolate("Price: $$100", &env).unwrap(), "Price: $$100");
        assert_eq!(interpolate("plain", &env).unwrap(), "plain");
    }

    /// **Scenario**: interpolation of an expression with braces inside.
    #[test]
    fn interpolation_with_nested_braces() {
        let env = json!({"n": 2});
        assert_eq!(
            interpolate("got ${ {a: n}.a }", &env).unwrap(),
            "got 2"
        );
    }

    /// **Scenario**: the law eval(interp("${x}")) == str(x) for scalars.
    #[test]
    fn interpolation_matches_str() {
        for v in [json!(1), json!(2.5), json!("hi"), json!(true), Value::Null] {
            let env = json!({ "x": v });
            let interpolated = interpolate("${x}", &env).unwrap();
            let stringified = evaluate("str(x)", &env).unwrap();
            assert_eq!(Value::String(interpolated), stringified);
        }
    }

    /// **Scenario**: append builds a new array, treating null as empty.
    #[test]
    fn append_builtin() {
        let env = json!({"xs": [1, 2]});
        assert_eq!(evaluate("append(xs, 3)", &env).unwrap(), json!([1, 2, 3]));
        assert_eq!(evaluate("append(null, 1)", &env).unwrap(), json!([1]));
    }

    /// **Scenario**: generate_id returns a 36-char UUID; timestamp is ISO.
    #[test]
    fn id_and_time_builtins() {
        let env = json!({});
        let id = evaluate("generate_id()", &env).unwrap();
        assert_eq!(id.as_str().unwrap().len(), 36);
        let ts = evaluate("timestamp()", &env).unwrap();
        assert!(ts.as_str().unwrap().contains('T'));
        assert!(evaluate("now()", &env).unwrap().as_i64().unwrap() > 0);
    }
}
