//! Byte-level framing shared by every codec mode.
//!
//! Parsers here never index raw buffers or panic: malformed input surfaces as
//! `PartwireError::DecodeFailed`. Schema resolution happens one level up, in
//! `codec`.

pub mod frame;

pub use frame::{FlattenPreamble, Frame, Prologue, ENCODING_VERSION, IDS_LEN, PROLOGUE_LEN};
