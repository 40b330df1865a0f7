//! Envelope: stamps an event with its simulation id and timestamp.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::SimEvent;

/// One delivered event: the payload plus where and when it happened.
///
/// `timestamp` is an RFC 3339 string so the envelope stays serde-only and the
/// engine decides the clock.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub simulation_id: Option<String>,
    pub timestamp: String,
    #[serde(flatten)]
    pub event: SimEvent,
}

impl Envelope {
    /// Wraps an event with its simulation id and timestamp.
    pub fn wrap(simulation_id: Option<String>, timestamp: String, event: SimEvent) -> Self {
        Self {
            simulation_id,
            timestamp,
            event,
        }
    }
}

/// Serializes an envelope to a single JSON object: the event's type + payload
/// with `simulation_id` and `timestamp` flattened alongside.
pub fn to_json(envelope: &Envelope) -> Result<Value, serde_json::Error> {
    serde_json::to_value(envelope)
}
