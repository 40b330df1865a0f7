//! Built-in payment app, expressed as a declarative definition.
//!
//! Ships with the engine both as a usable app and as the reference example of
//! the logic DSL: preconditions via `if`/`fail`, cross-agent writes through
//! the name resolver, shared-map request records, observations, and audit
//! logging all appear here.

use serde_json::json;
use std::collections::BTreeMap;

use crate::apps::definition::{
    ActionDefinition, ActionKind, AppDefinition, LogicValue, ParamSpec, ParamType, StateField,
    Statement,
};

fn expr(source: &str) -> LogicValue {
    LogicValue::expr(source)
}

fn object(fields: &[(&str, &str)]) -> LogicValue {
    LogicValue::Object(
        fields
            .iter()
            .map(|(key, source)| (key.to_string(), expr(source)))
            .collect(),
    )
}

fn returns(fields: &[(&str, &str)]) -> BTreeMap<String, LogicValue> {
    fields
        .iter()
        .map(|(key, source)| (key.to_string(), expr(source)))
        .collect()
}

fn fail(message: &str) -> Vec<Statement> {
    vec![Statement::Fail {
        message: message.to_string(),
    }]
}

fn guard(cond: &str, message: &str) -> Statement {
    Statement::If {
        cond: cond.to_string(),
        then: fail(message),
        otherwise: vec![],
    }
}

/// The `paypal` app definition: balances, transfers, money requests, and a
/// per-agent transaction history.
pub fn paypal_definition() -> AppDefinition {
    AppDefinition {
        app_id: "paypal".into(),
        name: "PayPal".into(),
        description: "Peer-to-peer payment app: check balances, send money, \
                      request money, and review transactions."
            .into(),
        category: "finance".into(),
        icon: "💸".into(),
        version: "1.0".into(),
        is_active: true,
        state_schema: vec![
            StateField::per_agent("balance", ParamType::Number, json!(1000.0)),
            StateField::per_agent("email", ParamType::String, json!("")),
            StateField::per_agent("transactions", ParamType::Array, json!([])),
            StateField::shared("requests", ParamType::Object, json!({})),
        ],
        initial_config: serde_json::Map::new(),
        actions: vec![
            check_balance(),
            transfer(),
            request_money(),
            pay_request(),
            decline_request(),
            view_transactions(),
        ],
    }
}

fn check_balance() -> ActionDefinition {
    ActionDefinition {
        name: "check_balance".into(),
        description: "Check your current balance.".into(),
        parameters: vec![],
        returns: json!({"balance": "number", "email": "string"}),
        kind: ActionKind::Read,
        logic: vec![
            guard(
                "agent.balance == null",
                "Account not found for ${agent.id}",
            ),
            Statement::Return {
                object: returns(&[("balance", "agent.balance"), ("email", "agent.email")]),
            },
        ],
    }
}

fn transfer() -> ActionDefinition {
    ActionDefinition {
        name: "transfer".into(),
        description: "Send money to another user.".into(),
        parameters: vec![
            ParamSpec::new("to", ParamType::String)
                .required()
                .with_description("Recipient id or name"),
            ParamSpec::new("amount", ParamType::Number)
                .required()
                .with_range(Some(0.01), None),
            ParamSpec::new("note", ParamType::String).with_default(json!("")),
        ],
        returns: json!({"new_balance": "number", "transaction_id": "string"}),
        kind: ActionKind::Write,
        logic: vec![
            guard(
                "lower(params.to) == agent.id || lower(params.to) == agent.name",
                "You cannot transfer money to yourself",
            ),
            guard(
                "agents[lower(params.to)] == null",
                "Recipient '${params.to}' not found",
            ),
            guard(
                "params.amount > agent.balance",
                "Insufficient funds: balance is $${agent.balance}",
            ),
            Statement::RandomId {
                binding: "txid".into(),
            },
            Statement::Set {
                path: "agent.balance".into(),
                value: expr("agent.balance - params.amount"),
            },
            Statement::Set {
                path: "agents[lower(params.to)].balance".into(),
                value: expr("agents[lower(params.to)].balance + params.amount"),
            },
            Statement::Set {
                path: "agent.transactions".into(),
                value: expr(
                    "append(agent.transactions, {id: txid, type: 'sent', \
                     counterparty: lower(params.to), amount: params.amount, \
                     note: params.note, timestamp: timestamp()})",
                ),
            },
            Statement::Set {
                path: "agents[lower(params.to)].transactions".into(),
                value: expr(
                    "append(agents[lower(params.to)].transactions, {id: txid, \
                     type: 'received', counterparty: agent.id, amount: params.amount, \
                     note: params.note, timestamp: timestamp()})",
                ),
            },
            Statement::Observe {
                to_agent: "lower(params.to)".into(),
                message: "You received $${params.amount} from ${agent.name}. Note: ${params.note}"
                    .into(),
                data: Some(object(&[
                    ("from", "agent.id"),
                    ("amount", "params.amount"),
                    ("transaction_id", "txid"),
                ])),
                priority: None,
            },
            Statement::Log {
                message: "transfer of $${params.amount} from ${agent.id} to ${lower(params.to)}"
                    .into(),
            },
            Statement::Return {
                object: returns(&[("new_balance", "agent.balance"), ("transaction_id", "txid")]),
            },
        ],
    }
}

fn request_money() -> ActionDefinition {
    ActionDefinition {
        name: "request_money".into(),
        description: "Request money from another user.".into(),
        parameters: vec![
            ParamSpec::new("from", ParamType::String)
                .required()
                .with_description("Id or name of the user to request from"),
            ParamSpec::new("amount", ParamType::Number)
                .required()
                .with_range(Some(0.01), None),
            ParamSpec::new("note", ParamType::String).with_default(json!("")),
        ],
        returns: json!({"request_id": "string"}),
        kind: ActionKind::Write,
        logic: vec![
            guard(
                "lower(params.from) == agent.id || lower(params.from) == agent.name",
                "You cannot request money from yourself",
            ),
            guard(
                "agents[lower(params.from)] == null",
                "User '${params.from}' not found",
            ),
            Statement::RandomId {
                binding: "rid".into(),
            },
            Statement::Set {
                path: "shared.requests[rid]".into(),
                value: expr(
                    "{id: rid, requester: agent.id, payer: lower(params.from), \
                     amount: params.amount, note: params.note, status: 'pending', \
                     created_at: timestamp()}",
                ),
            },
            Statement::Observe {
                to_agent: "lower(params.from)".into(),
                message: "${agent.name} requested $${params.amount} from you. Note: ${params.note}"
                    .into(),
                data: Some(object(&[("request_id", "rid"), ("amount", "params.amount")])),
                priority: None,
            },
            Statement::Log {
                message: "request ${rid}: ${agent.id} asks ${lower(params.from)} for \
                          $${params.amount}"
                    .into(),
            },
            Statement::Return {
                object: returns(&[("request_id", "rid")]),
            },
        ],
    }
}

fn pay_request() -> ActionDefinition {
    ActionDefinition {
        name: "pay_request".into(),
        description: "Pay a pending money request addressed to you.".into(),
        parameters: vec![ParamSpec::new("request_id", ParamType::String).required()],
        returns: json!({"new_balance": "number", "transaction_id": "string"}),
        kind: ActionKind::Confirm,
        logic: vec![
            guard(
                "shared.requests[params.request_id] == null",
                "Request '${params.request_id}' not found",
            ),
            guard(
                "shared.requests[params.request_id].status != 'pending'",
                "Request has already been ${shared.requests[params.request_id].status}",
            ),
            guard(
                "shared.requests[params.request_id].payer != agent.id",
                "This request is not addressed to you",
            ),
            guard(
                "shared.requests[params.request_id].amount > agent.balance",
                "Insufficient funds: balance is $${agent.balance}",
            ),
            Statement::RandomId {
                binding: "txid".into(),
            },
            Statement::Set {
                path: "agent.balance".into(),
                value: expr("agent.balance - shared.requests[params.request_id].amount"),
            },
            Statement::Set {
                path: "agents[shared.requests[params.request_id].requester].balance".into(),
                value: expr(
                    "agents[shared.requests[params.request_id].requester].balance + \
                     shared.requests[params.request_id].amount",
                ),
            },
            Statement::Set {
                path: "agent.transactions".into(),
                value: expr(
                    "append(agent.transactions, {id: txid, type: 'sent', \
                     counterparty: shared.requests[params.request_id].requester, \
                     amount: shared.requests[params.request_id].amount, \
                     note: shared.requests[params.request_id].note, timestamp: timestamp()})",
                ),
            },
            Statement::Set {
                path: "agents[shared.requests[params.request_id].requester].transactions".into(),
                value: expr(
                    "append(agents[shared.requests[params.request_id].requester].transactions, \
                     {id: txid, type: 'received', counterparty: agent.id, \
                     amount: shared.requests[params.request_id].amount, \
                     note: shared.requests[params.request_id].note, timestamp: timestamp()})",
                ),
            },
            Statement::Observe {
                to_agent: "shared.requests[params.request_id].requester".into(),
                message: "${agent.name} paid your request for \
                          $${shared.requests[params.request_id].amount}"
                    .into(),
                data: Some(object(&[
                    ("request_id", "params.request_id"),
                    ("transaction_id", "txid"),
                ])),
                priority: None,
            },
            Statement::Set {
                path: "shared.requests[params.request_id].status".into(),
                value: expr("'paid'"),
            },
            Statement::Set {
                path: "shared.requests[params.request_id].paid_at".into(),
                value: expr("timestamp()"),
            },
            Statement::Return {
                object: returns(&[("new_balance", "agent.balance"), ("transaction_id", "txid")]),
            },
        ],
    }
}

fn decline_request() -> ActionDefinition {
    ActionDefinition {
        name: "decline_request".into(),
        description: "Decline a pending money request addressed to you.".into(),
        parameters: vec![ParamSpec::new("request_id", ParamType::String).required()],
        returns: json!({"request_id": "string", "status": "string"}),
        kind: ActionKind::Confirm,
        logic: vec![
            guard(
                "shared.requests[params.request_id] == null",
                "Request '${params.request_id}' not found",
            ),
            guard(
                "shared.requests[params.request_id].status != 'pending'",
                "Request has already been ${shared.requests[params.request_id].status}",
            ),
            guard(
                "shared.requests[params.request_id].payer != agent.id",
                "This request is not addressed to you",
            ),
            Statement::Observe {
                to_agent: "shared.requests[params.request_id].requester".into(),
                message: "${agent.name} declined your request for \
                          $${shared.requests[params.request_id].amount}"
                    .into(),
                data: Some(object(&[("request_id", "params.request_id")])),
                priority: None,
            },
            Statement::Set {
                path: "shared.requests[params.request_id].status".into(),
                value: expr("'declined'"),
            },
            Statement::Return {
                object: returns(&[
                    ("request_id", "params.request_id"),
                    ("status", "'declined'"),
                ]),
            },
        ],
    }
}

fn view_transactions() -> ActionDefinition {
    ActionDefinition {
        name: "view_transactions".into(),
        description: "List your transaction history.".into(),
        parameters: vec![],
        returns: json!({"transactions": "array", "total_count": "number"}),
        kind: ActionKind::Read,
        logic: vec![Statement::Return {
            object: returns(&[
                ("transactions", "agent.transactions"),
                ("total_count", "len(agent.transactions)"),
            ]),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the definition passes the static field check and exposes
    /// the full action set.
    #[test]
    fn definition_is_well_formed() {
        let definition = paypal_definition();
        definition.validate().unwrap();

        let names: Vec<&str> = definition.actions.iter().map(|a| a.name.as_str()).collect();
        for expected in [
            "check_balance",
            "transfer",
            "request_money",
            "view_transactions",
            "pay_request",
            "decline_request",
        ] {
            assert!(names.contains(&expected), "missing action {}", expected);
        }
    }

    /// **Scenario**: the definition round-trips through its JSON wire form.
    #[test]
    fn definition_roundtrips_as_json() {
        let definition = paypal_definition();
        let json = serde_json::to_value(&definition).unwrap();
        let back = AppDefinition::from_json(&json).unwrap();
        assert_eq!(back.app_id, "paypal");
        assert_eq!(back.actions.len(), definition.actions.len());
        back.validate().unwrap();
    }
}
