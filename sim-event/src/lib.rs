//! Simulation event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of one engine event and the envelope that
//! stamps it with a simulation id and timestamp. It does not depend on the
//! engine; the engine bridges its internal happenings into [`SimEvent`] and
//! wraps them with [`Envelope::wrap`] before fan-out.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope};
pub use event::SimEvent;
