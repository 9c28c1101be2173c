//! Part body encoding.
//!
//! Field layout, in accessor order of the schema's top level:
//! - scalar / list / part fields start with a presence byte (`0` null, `1` value);
//! - bool is one byte (`0`/`1`), int 4, long 8, double 8 (IEEE bits), all big-endian;
//! - string and bytes are a `u32` length followed by that many bytes;
//! - a list is a `u32` count followed by non-null elements;
//! - a nested part is `u64` schema id, `u32` length, then its body;
//! - a choice is a `u32` variant index followed by that variant's fields.
//!
//! Parsing follows the same rules as the frame layer: `Buf` with
//! `remaining()` checks, never indexing, and trailing bytes are an error.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PartwireError, Result};
use crate::schema::{Accessor, ScalarType, Schema, SchemaId, SchemaRegistry, Shape};

use super::tree::{Slot, Tree};
use super::{MessagePart, Value};

const NULL: u8 = 0;
const PRESENT: u8 = 1;

/// Deepest chain of nested parts a body may carry below its top level.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Ids reached while scanning a part body.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    /// Every nested part schema id (first-seen order, no duplicates).
    pub(crate) ids: Vec<SchemaId>,
    /// Nested ids the registry does not know.
    pub(crate) missing: Vec<SchemaId>,
}

impl Scan {
    fn note(list: &mut Vec<SchemaId>, id: SchemaId) {
        if !list.contains(&id) {
            list.push(id);
        }
    }
}

enum Mode<'a> {
    Build(&'a mut Tree),
    Scan(&'a mut Scan),
}

struct Walker<'a> {
    registry: &'a Arc<SchemaRegistry>,
    schema: &'a Schema,
    version: u16,
    /// Nested parts above the body being walked.
    depth: usize,
    mode: Mode<'a>,
}

/// Decode a body into a tree. Nested parts stay in byte form.
pub(crate) fn decode_tree(
    registry: &Arc<SchemaRegistry>,
    schema: &Schema,
    version: u16,
    bytes: &Bytes,
) -> Result<Tree> {
    let mut tree = Tree::empty(schema);
    let mut buf = bytes.clone();
    Walker {
        registry,
        schema,
        version,
        depth: 0,
        mode: Mode::Build(&mut tree),
    }
    .fields(schema.top_level(), &mut buf)?;
    finish(schema.id(), &buf)?;
    Ok(tree)
}

/// Validate a body without materializing it and collect nested schema ids.
///
/// Nested bodies with a registered schema are validated recursively; the
/// others are recorded in `Scan::missing` and skipped.
pub(crate) fn scan(
    registry: &Arc<SchemaRegistry>,
    schema: &Schema,
    bytes: &Bytes,
    out: &mut Scan,
) -> Result<()> {
    scan_at(registry, schema, bytes, out, 0)
}

fn scan_at(
    registry: &Arc<SchemaRegistry>,
    schema: &Schema,
    bytes: &Bytes,
    out: &mut Scan,
    depth: usize,
) -> Result<()> {
    let mut buf = bytes.clone();
    Walker {
        registry,
        schema,
        version: 0,
        depth,
        mode: Mode::Scan(out),
    }
    .fields(schema.top_level(), &mut buf)?;
    finish(schema.id(), &buf)
}

fn finish(id: SchemaId, buf: &Bytes) -> Result<()> {
    if buf.has_remaining() {
        return Err(PartwireError::decode_in(
            id,
            format!("{} trailing bytes after part body", buf.remaining()),
        ));
    }
    Ok(())
}

impl Walker<'_> {
    fn fail(&self, reason: impl Into<String>) -> PartwireError {
        PartwireError::decode_in(self.schema.id(), reason)
    }

    fn need(&self, buf: &Bytes, n: usize, what: &str) -> Result<()> {
        if buf.remaining() < n {
            return Err(self.fail(format!("truncated {what}")));
        }
        Ok(())
    }

    fn presence(&self, buf: &mut Bytes) -> Result<bool> {
        self.need(buf, 1, "presence byte")?;
        match buf.get_u8() {
            NULL => Ok(false),
            PRESENT => Ok(true),
            other => Err(self.fail(format!("invalid presence byte {other}"))),
        }
    }

    fn length(&self, buf: &mut Bytes, what: &str) -> Result<usize> {
        self.need(buf, 4, what)?;
        let len = buf.get_u32() as usize;
        self.need(buf, len, what)?;
        Ok(len)
    }

    fn scalar(&self, buf: &mut Bytes, ty: ScalarType) -> Result<Value> {
        Ok(match ty {
            ScalarType::Bool => {
                self.need(buf, 1, "bool")?;
                match buf.get_u8() {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => return Err(self.fail(format!("invalid bool byte {other}"))),
                }
            }
            ScalarType::Int => {
                self.need(buf, 4, "int")?;
                Value::Int(buf.get_i32())
            }
            ScalarType::Long => {
                self.need(buf, 8, "long")?;
                Value::Long(buf.get_i64())
            }
            ScalarType::Double => {
                self.need(buf, 8, "double")?;
                Value::Double(f64::from_bits(buf.get_u64()))
            }
            ScalarType::String => {
                let len = self.length(buf, "string")?;
                let raw = buf.split_to(len);
                let s = std::str::from_utf8(&raw)
                    .map_err(|_| self.fail("string is not valid UTF-8"))?;
                Value::Str(s.to_owned())
            }
            ScalarType::Bytes => {
                let len = self.length(buf, "bytes")?;
                Value::Bytes(buf.split_to(len))
            }
        })
    }

    fn store(&mut self, acc: Accessor, slot: Slot) {
        if let Mode::Build(tree) = &mut self.mode {
            if let Some(s) = tree.slots.get_mut(acc.index()) {
                *s = slot;
            }
        }
    }

    fn fields(&mut self, accs: &[Accessor], buf: &mut Bytes) -> Result<()> {
        let schema = self.schema;
        for &acc in accs {
            match &schema.info(acc).shape {
                Shape::Scalar(ty) => {
                    let v = if self.presence(buf)? {
                        self.scalar(buf, *ty)?
                    } else {
                        Value::Null
                    };
                    self.store(acc, Slot::Value(v));
                }
                Shape::List(ty) => {
                    let v = if self.presence(buf)? {
                        self.need(buf, 4, "list count")?;
                        let count = buf.get_u32() as usize;
                        // Every element takes at least one byte.
                        self.need(buf, count, "list elements")?;
                        let mut items = Vec::with_capacity(count);
                        for _ in 0..count {
                            items.push(self.scalar(buf, *ty)?);
                        }
                        Value::List(items)
                    } else {
                        Value::Null
                    };
                    self.store(acc, Slot::Value(v));
                }
                Shape::Part => {
                    if !self.presence(buf)? {
                        self.store(acc, Slot::Part(None));
                        continue;
                    }
                    self.need(buf, 8, "nested schema id")?;
                    let id = buf.get_u64();
                    if id == 0 {
                        return Err(self.fail("nested part with reserved schema id 0"));
                    }
                    let len = self.length(buf, "nested part")?;
                    let body = buf.split_to(len);
                    self.nested(acc, id, body)?;
                }
                Shape::Choice { variants, .. } => {
                    self.need(buf, 4, "variant index")?;
                    let idx = buf.get_u32();
                    let Some(variant) = variants.get(idx as usize) else {
                        return Err(self.fail(format!(
                            "variant {idx} out of range for {}",
                            schema.info(acc).path
                        )));
                    };
                    self.store(acc, Slot::Choice(idx));
                    self.fields(&variant.fields, buf)?;
                }
            }
        }
        Ok(())
    }

    fn nested(&mut self, acc: Accessor, id: SchemaId, body: Bytes) -> Result<()> {
        let registry = self.registry;
        let version = self.version;
        let depth = self.depth + 1;
        match &mut self.mode {
            Mode::Build(tree) => {
                let schema = registry.retrieve(id)?;
                let part = MessagePart::from_trusted(
                    Arc::clone(registry),
                    Arc::clone(&schema),
                    schema,
                    version,
                    body,
                );
                if let Some(s) = tree.slots.get_mut(acc.index()) {
                    *s = Slot::Part(Some(part));
                }
                Ok(())
            }
            Mode::Scan(out) => {
                if depth > MAX_NESTING_DEPTH {
                    return Err(PartwireError::decode_in(id, "nesting too deep"));
                }
                Scan::note(&mut out.ids, id);
                match registry.get(id) {
                    Some(schema) => scan_at(registry, &schema, &body, out, depth),
                    None => {
                        Scan::note(&mut out.missing, id);
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Encode a tree into a fresh body. Nested parts are assembled as needed.
pub(crate) fn encode_tree(schema: &Schema, tree: &Tree) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_fields(schema, tree, schema.top_level(), &mut buf)?;
    Ok(buf.freeze())
}

fn put_len(buf: &mut BytesMut, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| PartwireError::EncodeFailed(format!("{what} longer than u32::MAX")))?;
    buf.put_u32(len);
    Ok(())
}

fn put_scalar(buf: &mut BytesMut, v: &Value) -> Result<()> {
    match v {
        Value::Bool(b) => buf.put_u8(u8::from(*b)),
        Value::Int(i) => buf.put_i32(*i),
        Value::Long(l) => buf.put_i64(*l),
        Value::Double(d) => buf.put_u64(d.to_bits()),
        Value::Str(s) => {
            put_len(buf, s.len(), "string")?;
            buf.put_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            put_len(buf, b.len(), "bytes")?;
            buf.put_slice(b);
        }
        Value::Null | Value::List(_) => {
            return Err(PartwireError::Internal("non-scalar list element".into()));
        }
    }
    Ok(())
}

fn mismatch(schema: &Schema, acc: Accessor) -> PartwireError {
    PartwireError::Internal(format!(
        "slot for {} does not match its shape",
        schema.info(acc).path
    ))
}

fn put_fields(schema: &Schema, tree: &Tree, accs: &[Accessor], buf: &mut BytesMut) -> Result<()> {
    for &acc in accs {
        let slot = tree.slots.get(acc.index()).ok_or_else(|| mismatch(schema, acc))?;
        match (&schema.info(acc).shape, slot) {
            (Shape::Scalar(_) | Shape::List(_), Slot::Value(Value::Null)) => buf.put_u8(NULL),
            (Shape::Scalar(_), Slot::Value(v)) => {
                buf.put_u8(PRESENT);
                put_scalar(buf, v)?;
            }
            (Shape::List(_), Slot::Value(Value::List(items))) => {
                buf.put_u8(PRESENT);
                put_len(buf, items.len(), "list")?;
                for item in items {
                    put_scalar(buf, item)?;
                }
            }
            (Shape::Part, Slot::Part(None)) => buf.put_u8(NULL),
            (Shape::Part, Slot::Part(Some(part))) => {
                let body = part.encode()?;
                buf.put_u8(PRESENT);
                buf.put_u64(part.encoding_id());
                put_len(buf, body.len(), "nested part")?;
                buf.put_slice(&body);
            }
            (Shape::Choice { variants, .. }, Slot::Choice(idx)) => {
                let variant = variants
                    .get(*idx as usize)
                    .ok_or_else(|| mismatch(schema, acc))?;
                buf.put_u32(*idx);
                put_fields(schema, tree, &variant.fields, buf)?;
            }
            _ => return Err(mismatch(schema, acc)),
        }
    }
    Ok(())
}
