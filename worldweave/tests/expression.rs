//! Expression language conformance: literals, paths, operators, builtins,
//! interpolation, and the context-variable patterns app logic relies on.

mod init_logging;

use serde_json::{json, Value};
use worldweave::apps::{evaluate, interpolate, ExpressionError, ExpressionEvaluator};

#[test]
fn literals() {
    init_logging::init();
    let env = json!({});
    assert_eq!(evaluate("42", &env).unwrap(), json!(42));
    assert_eq!(evaluate("-10", &env).unwrap(), json!(-10));
    assert_eq!(evaluate("3.14", &env).unwrap(), json!(3.14));
    assert_eq!(evaluate("-0.5", &env).unwrap(), json!(-0.5));
    assert_eq!(evaluate("\"hello world\"", &env).unwrap(), json!("hello world"));
    assert_eq!(evaluate("'hello'", &env).unwrap(), json!("hello"));
    assert_eq!(evaluate("true", &env).unwrap(), json!(true));
    assert_eq!(evaluate("false", &env).unwrap(), json!(false));
    assert_eq!(evaluate("null", &env).unwrap(), Value::Null);
}

#[test]
fn nested_and_dynamic_paths() {
    let env = json!({
        "a": {"b": {"c": {"d": 42}}},
        "users": {"alice": {"balance": 100}},
        "key": "alice",
        "items": [10, 20, 30],
    });
    assert_eq!(evaluate("a.b.c.d", &env).unwrap(), json!(42));
    assert_eq!(evaluate("users['alice'].balance", &env).unwrap(), json!(100));
    assert_eq!(evaluate("users[key].balance", &env).unwrap(), json!(100));
    assert_eq!(evaluate("items[0] + items[2]", &env).unwrap(), json!(40));
}

#[test]
fn operator_precedence_and_parentheses() {
    let env = json!({"a": 10, "b": 5});
    assert_eq!(evaluate("2 + 3 * 4", &env).unwrap(), json!(14));
    assert_eq!(evaluate("10 - 2 * 3", &env).unwrap(), json!(4));
    assert_eq!(evaluate("(2 + 3) * 4", &env).unwrap(), json!(20));
    assert_eq!(evaluate("a + b", &env).unwrap(), json!(15));
    assert_eq!(evaluate("a * b", &env).unwrap(), json!(50));
}

#[test]
fn comparisons_and_logic() {
    let env = json!({"x": 10, "y": 20});
    assert_eq!(evaluate("5 == 5", &env).unwrap(), json!(true));
    assert_eq!(evaluate("5 != 6", &env).unwrap(), json!(true));
    assert_eq!(evaluate("5 <= 5", &env).unwrap(), json!(true));
    assert_eq!(evaluate("3 < 5 && 5 > 3", &env).unwrap(), json!(true));
    assert_eq!(evaluate("x < y && y > 15", &env).unwrap(), json!(true));
    assert_eq!(evaluate("x > y || y > 15", &env).unwrap(), json!(true));
    assert_eq!(evaluate("!true", &env).unwrap(), json!(false));
    assert_eq!(evaluate("'a' == \"a\"", &env).unwrap(), json!(true));
    // Numeric equality crosses int/float representations.
    assert_eq!(evaluate("5 == 5.0", &env).unwrap(), json!(true));
}

#[test]
fn builtin_functions() {
    let env = json!({"items": [1, 2, 3, 4, 5], "name": "Alice", "letters": ["a", "b"]});
    assert_eq!(evaluate("len(items)", &env).unwrap(), json!(5));
    assert_eq!(evaluate("len(name)", &env).unwrap(), json!(5));
    assert_eq!(evaluate("contains(letters, 'a')", &env).unwrap(), json!(true));
    assert_eq!(evaluate("contains(letters, 'z')", &env).unwrap(), json!(false));
    assert_eq!(evaluate("lower(name)", &env).unwrap(), json!("alice"));
    assert_eq!(evaluate("upper(name)", &env).unwrap(), json!("ALICE"));
    assert_eq!(evaluate("str(42)", &env).unwrap(), json!("42"));
    assert_eq!(evaluate("num('42')", &env).unwrap(), json!(42));
    assert_eq!(evaluate("num('3.14')", &env).unwrap(), json!(3.14));
    assert_eq!(evaluate("bool(1)", &env).unwrap(), json!(true));
    assert_eq!(evaluate("bool('')", &env).unwrap(), json!(false));
    assert_eq!(evaluate("round(3.7)", &env).unwrap(), json!(4));
    assert_eq!(evaluate("round(3.2)", &env).unwrap(), json!(3));
    assert_eq!(evaluate("abs(-5)", &env).unwrap(), json!(5));
    assert_eq!(evaluate("min(3, 1, 4, 1, 5)", &env).unwrap(), json!(1));
    assert_eq!(evaluate("max(3, 1, 4, 1, 5)", &env).unwrap(), json!(5));
}

#[test]
fn transfer_validation_patterns() {
    // The exact shapes the payment app's logic evaluates.
    let env = json!({
        "params": {"amount": 50, "to": "bob"},
        "agent": {"id": "alice", "balance": 1000},
        "agents": {
            "alice": {"balance": 1000},
            "bob": {"balance": 500},
        },
        "config": {"initial_balance": 1000, "max_transfer": 10000},
    });

    assert_eq!(
        evaluate("params.amount <= agent.balance", &env).unwrap(),
        json!(true)
    );
    assert_eq!(evaluate("params.to != agent.id", &env).unwrap(), json!(true));
    assert_eq!(evaluate("params.amount > 0", &env).unwrap(), json!(true));
    assert_eq!(
        evaluate("agent.balance - params.amount", &env).unwrap(),
        json!(950)
    );
    assert_eq!(
        evaluate("agents[params.to].balance", &env).unwrap(),
        json!(500)
    );
    assert_eq!(
        evaluate("config.max_transfer", &env).unwrap(),
        json!(10000)
    );
    assert_eq!(
        evaluate(
            "(agent.balance >= params.amount && params.amount > 0) || false",
            &env
        )
        .unwrap(),
        json!(true)
    );
}

#[test]
fn interpolation_behavior() {
    let env = json!({"name": "Alice", "amount": 50, "user": {"name": "Alice"}, "a": 10, "b": 20});
    assert_eq!(interpolate("Hello ${name}!", &env).unwrap(), "Hello Alice!");
    assert_eq!(interpolate("Amount: $${amount}", &env).unwrap(), "Amount: $50");
    assert_eq!(interpolate("Sum: ${a + b}", &env).unwrap(), "Sum: 30");
    assert_eq!(interpolate("User: ${user.name}", &env).unwrap(), "User: Alice");
    assert_eq!(interpolate("Hello world!", &env).unwrap(), "Hello world!");
    assert_eq!(interpolate("Price: $$100", &env).unwrap(), "Price: $$100");
}

#[test]
fn error_conditions() {
    let env = json!({});
    assert!(matches!(
        evaluate("2 +", &env),
        Err(ExpressionError::Syntax(_))
    ));
    assert!(matches!(
        evaluate("unknown_func()", &env),
        Err(ExpressionError::UnknownFunction(_))
    ));
    assert_eq!(
        evaluate("10 / 0", &env).unwrap_err(),
        ExpressionError::DivisionByZero
    );
    assert_eq!(
        evaluate("10.0 / 0.0", &env).unwrap_err(),
        ExpressionError::DivisionByZero
    );
}

#[test]
fn evaluator_handle_and_ast_cache() {
    let evaluator = ExpressionEvaluator::new();
    let env = json!({"name": "Alice"});
    // Repeated evaluation exercises the shared AST cache.
    for _ in 0..5 {
        assert_eq!(evaluator.evaluate("1 + 2 + 3", &env).unwrap(), json!(6));
    }
    assert_eq!(
        evaluator
            .evaluate_interpolated("Hello ${name}!", &env)
            .unwrap(),
        "Hello Alice!"
    );
}

#[test]
fn missing_paths_never_error() {
    let env = json!({"user": {"name": "Alice"}});
    assert_eq!(evaluate("user.age", &env).unwrap(), Value::Null);
    assert_eq!(evaluate("missing", &env).unwrap(), Value::Null);
    assert_eq!(evaluate("user.address.city", &env).unwrap(), Value::Null);
    // Null participates in equality checks without erroring.
    assert_eq!(evaluate("user.age == null", &env).unwrap(), json!(true));
    assert_eq!(evaluate("!user.age", &env).unwrap(), json!(true));
}
