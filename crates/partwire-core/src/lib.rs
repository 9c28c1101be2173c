//! partwire core: schemas, message parts, and the message codec.
//!
//! This crate owns the byte formats and the in-memory message model. It is
//! synchronous and carries no runtime dependency; peer negotiation lives in
//! `partwire-comms`.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input
//! surfaces as `PartwireError::DecodeFailed` carrying the governing schema id
//! where one is known.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod error;
pub mod message;
pub mod part;
pub mod protocol;
pub mod schema;

pub use codec::{AccessSchemas, Restored, WireSlices};
pub use error::{ErrorCode, PartwireError, Result};
pub use message::{MessageObject, PartRole};
pub use part::{MessagePart, Value, Variant};
pub use schema::{Accessor, Schema, SchemaId, SchemaRegistry};
