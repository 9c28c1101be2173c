//! Top-level facade crate for partwire.
//!
//! Re-exports the codec core and the negotiation layer so users can depend on
//! a single crate.

pub mod core {
    pub use partwire_core::*;
}

pub mod comms {
    pub use partwire_comms::*;
}

pub use partwire_comms::{LoopbackPeer, Negotiator, SchemaPeer};
pub use partwire_core::{codec, MessageObject, MessagePart, PartwireError, Result, Schema, SchemaRegistry, Value};
