//! Message framing (panic-free).
//!
//! Prologue (24 bytes, big-endian):
//!
//! ```text
//! u16 header_version | u64 header_schema | u16 payload_version | u64 payload_schema | u32 header_len
//! ```
//!
//! A header-only message writes zeros for the payload version and schema.
//!
//! Layouts built on it:
//! - single buffer: `prologue | header | payload?`;
//! - wire slices: `[prologue] [header] [payload]?`;
//! - flattened slices: `[u32 name_len | name | u32 count | u64 ids.. | prologue] [header] [payload]?`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PartwireError, Result};
use crate::schema::SchemaId;

/// Only part encoding version understood by this crate.
pub const ENCODING_VERSION: u16 = 1;

/// Versions and schema ids of both parts.
pub const IDS_LEN: usize = 2 * (2 + 8);
/// Ids plus the header length field.
pub const PROLOGUE_LEN: usize = IDS_LEN + 4;

/// Fixed-size frame prologue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prologue {
    pub header_version: u16,
    pub header_schema: SchemaId,
    pub payload_version: u16,
    /// `0` when the message has no payload.
    pub payload_schema: SchemaId,
    pub header_len: u32,
}

impl Prologue {
    pub fn has_payload(&self) -> bool {
        self.payload_schema != 0
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.reserve(PROLOGUE_LEN);
        buf.put_u16(self.header_version);
        buf.put_u64(self.header_schema);
        buf.put_u16(self.payload_version);
        buf.put_u64(self.payload_schema);
        buf.put_u32(self.header_len);
    }

    /// Consume a prologue from the front of `buf`.
    pub fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < PROLOGUE_LEN {
            return Err(PartwireError::decode(format!(
                "frame shorter than {PROLOGUE_LEN}-byte prologue ({} bytes)",
                buf.remaining()
            )));
        }
        let p = Prologue {
            header_version: buf.get_u16(),
            header_schema: buf.get_u64(),
            payload_version: buf.get_u16(),
            payload_schema: buf.get_u64(),
            header_len: buf.get_u32(),
        };
        if p.header_schema == 0 {
            return Err(PartwireError::decode("header schema id is 0"));
        }
        Ok(p)
    }
}

/// Prologue plus zero-copy views of the part bodies.
#[derive(Debug, Clone)]
pub struct Frame {
    pub prologue: Prologue,
    pub header: Bytes,
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Bytes the frame occupied on the wire.
    pub fn wire_len(&self) -> usize {
        PROLOGUE_LEN + self.header.len() + self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Split a single-buffer frame.
    ///
    /// The buffer must hold exactly the header when the prologue names no
    /// payload schema, and header plus a non-empty payload when it does.
    pub fn parse_single(mut buf: Bytes) -> Result<Self> {
        let prologue = Prologue::parse(&mut buf)?;
        let header_len = prologue.header_len as usize;
        if buf.remaining() < header_len {
            return Err(PartwireError::decode(format!(
                "header length {header_len} exceeds remaining {} bytes",
                buf.remaining()
            )));
        }
        let header = buf.split_to(header_len);
        let payload = Self::payload_from(&prologue, buf)?;
        Ok(Frame {
            prologue,
            header,
            payload,
        })
    }

    /// Assemble a frame from separately delivered prologue/header/payload slices.
    pub fn from_slices(mut prologue_buf: Bytes, header: Bytes, payload: Option<Bytes>) -> Result<Self> {
        let prologue = Prologue::parse(&mut prologue_buf)?;
        if prologue_buf.has_remaining() {
            return Err(PartwireError::decode(format!(
                "{} unexpected bytes after prologue",
                prologue_buf.remaining()
            )));
        }
        if header.len() != prologue.header_len as usize {
            return Err(PartwireError::decode(format!(
                "header slice is {} bytes, prologue says {}",
                header.len(),
                prologue.header_len
            )));
        }
        let payload = Self::payload_from(&prologue, payload.unwrap_or_default())?;
        Ok(Frame {
            prologue,
            header,
            payload,
        })
    }

    fn payload_from(prologue: &Prologue, rest: Bytes) -> Result<Option<Bytes>> {
        if !prologue.has_payload() && prologue.payload_version != 0 {
            return Err(PartwireError::decode(format!(
                "payload version {} without a payload schema",
                prologue.payload_version
            )));
        }
        match (prologue.has_payload(), rest.is_empty()) {
            (false, true) => Ok(None),
            (true, false) => Ok(Some(rest)),
            (false, false) => Err(PartwireError::decode(format!(
                "{} bytes follow the header but no payload schema is set",
                rest.len()
            ))),
            (true, true) => Err(PartwireError::decode_in(
                prologue.payload_schema,
                "payload schema set but no payload bytes",
            )),
        }
    }
}

/// Name and schema-id list written ahead of the prologue by flatten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenPreamble {
    pub name: String,
    pub schema_ids: Vec<SchemaId>,
}

impl FlattenPreamble {
    pub fn put(&self, buf: &mut BytesMut) -> Result<()> {
        let name_len = u32::try_from(self.name.len())
            .map_err(|_| PartwireError::EncodeFailed("message name too long".into()))?;
        let count = u32::try_from(self.schema_ids.len())
            .map_err(|_| PartwireError::EncodeFailed("too many schema ids".into()))?;
        buf.reserve(8 + self.name.len() + 8 * self.schema_ids.len());
        buf.put_u32(name_len);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(count);
        for id in &self.schema_ids {
            buf.put_u64(*id);
        }
        Ok(())
    }

    /// Consume a preamble from the front of `buf`.
    pub fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(PartwireError::decode("flattened frame missing name length"));
        }
        let name_len = buf.get_u32() as usize;
        if buf.remaining() < name_len {
            return Err(PartwireError::decode("flattened frame name truncated"));
        }
        let raw = buf.split_to(name_len);
        let name = std::str::from_utf8(&raw)
            .map_err(|_| PartwireError::decode("flattened frame name is not UTF-8"))?
            .to_owned();

        if buf.remaining() < 4 {
            return Err(PartwireError::decode("flattened frame missing schema count"));
        }
        let count = buf.get_u32() as usize;
        if buf.remaining() / 8 < count {
            return Err(PartwireError::decode("flattened frame schema ids truncated"));
        }
        let schema_ids = (0..count).map(|_| buf.get_u64()).collect();
        Ok(Self { name, schema_ids })
    }
}
