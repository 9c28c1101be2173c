//! partwire comms: schema negotiation between peers.
//!
//! A `Negotiator` sits on one connection. It pushes schemas ahead of outbound
//! messages and requests unknown schemas before inbound messages are decoded,
//! talking to the other side through a `SchemaPeer`. Configuration is strict
//! YAML (`config`); counters render as Prometheus text (`stats`).

pub mod config;
pub mod negotiator;
pub mod peer;
pub mod responder;
pub mod stats;

pub use negotiator::{NegotiationState, Negotiator};
pub use peer::{LoopbackPeer, SchemaPeer};
