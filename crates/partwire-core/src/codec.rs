//! Message encode / flatten / decode / restore.
//!
//! Every encode path holds the message lock from write-back until the last
//! slice is produced. Every decode path builds the whole message or fails;
//! no partially decoded message escapes.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PartwireError, Result};
use crate::message::MessageObject;
use crate::part::{wire, MessagePart};
use crate::protocol::frame::{FlattenPreamble, Frame, Prologue, PROLOGUE_LEN};
use crate::schema::{Schema, SchemaId, SchemaRegistry, SchemaStore};

/// Encoded message as separately transmittable slices:
/// `[prologue or flatten preamble] [header] [payload]?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSlices {
    pub first: Bytes,
    pub header: Bytes,
    pub payload: Option<Bytes>,
}

impl WireSlices {
    pub fn to_vec(&self) -> Vec<Bytes> {
        let mut out = vec![self.first.clone(), self.header.clone()];
        if let Some(p) = &self.payload {
            out.push(p.clone());
        }
        out
    }

    pub fn slice_count(&self) -> usize {
        if self.payload.is_some() {
            3
        } else {
            2
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.first.len() + self.header.len() + self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Concatenate into one buffer. For `encode_wire` output this is the
    /// single-buffer layout accepted by `decode_single`.
    pub fn concat(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_bytes());
        buf.put_slice(&self.first);
        buf.put_slice(&self.header);
        if let Some(p) = &self.payload {
            buf.put_slice(p);
        }
        buf.freeze()
    }
}

/// Schemas the caller wants to read the decoded parts through. `None` means
/// "use the encoding schema".
#[derive(Debug, Clone, Default)]
pub struct AccessSchemas {
    pub header: Option<Arc<Schema>>,
    pub payload: Option<Arc<Schema>>,
}

impl AccessSchemas {
    pub fn header(schema: Arc<Schema>) -> Self {
        Self {
            header: Some(schema),
            payload: None,
        }
    }

    pub fn both(header: Arc<Schema>, payload: Arc<Schema>) -> Self {
        Self {
            header: Some(header),
            payload: Some(payload),
        }
    }
}

/// Output of `restore`.
#[derive(Debug)]
pub struct Restored {
    pub name: String,
    pub schema_ids: Vec<SchemaId>,
    pub message: MessageObject,
}

fn prologue_for(header: &MessagePart, header_len: usize, payload: Option<&MessagePart>) -> Result<Prologue> {
    let header_len = u32::try_from(header_len)
        .map_err(|_| PartwireError::EncodeFailed("header longer than u32::MAX".into()))?;
    Ok(Prologue {
        header_version: header.version(),
        header_schema: header.encoding_id(),
        payload_version: payload.map_or(0, MessagePart::version),
        payload_schema: payload.map_or(0, MessagePart::encoding_id),
        header_len,
    })
}

/// Single contiguous buffer for a header-only message.
pub fn encode_single(msg: &MessageObject) -> Result<Bytes> {
    let locked = msg.lock_flushed()?;
    if locked.payload().is_some() {
        return Err(PartwireError::EncodeFailed(
            "single-buffer encoding is for header-only messages".into(),
        ));
    }
    let header = locked.header().encode()?;
    let prologue = prologue_for(locked.header(), header.len(), None)?;

    let mut buf = BytesMut::with_capacity(PROLOGUE_LEN + header.len());
    prologue.put(&mut buf);
    buf.put_slice(&header);
    tracing::debug!(
        header_schema = prologue.header_schema,
        len = buf.len(),
        "encoded single-buffer message"
    );
    Ok(buf.freeze())
}

/// Prologue, header and payload as separate slices.
pub fn encode_wire(msg: &MessageObject) -> Result<WireSlices> {
    let locked = msg.lock_flushed()?;
    let header = locked.header().encode()?;
    let payload = locked.payload().map(MessagePart::encode).transpose()?;
    let prologue = prologue_for(locked.header(), header.len(), locked.payload())?;

    let mut first = BytesMut::with_capacity(PROLOGUE_LEN);
    prologue.put(&mut first);
    tracing::debug!(
        header_schema = prologue.header_schema,
        payload_schema = prologue.payload_schema,
        header_len = header.len(),
        payload_len = payload.as_ref().map_or(0, Bytes::len),
        "encoded wire slices"
    );
    Ok(WireSlices {
        first: first.freeze(),
        header,
        payload,
    })
}

/// Self-describing form for durable storage: the first slice also carries
/// `name` and every schema id needed to decode, and those schemas are saved
/// to `store` when one is given.
pub fn flatten(msg: &MessageObject, name: &str, store: Option<&dyn SchemaStore>) -> Result<WireSlices> {
    let locked = msg.lock_flushed()?;
    let schemas = msg.encoding_schemas()?;
    if let Some(store) = store {
        store
            .save_schemas(&schemas)
            .map_err(|e| PartwireError::EncodeFailed(format!("schema store: {e}")))?;
    }

    let header = locked.header().encode()?;
    let payload = locked.payload().map(MessagePart::encode).transpose()?;
    let prologue = prologue_for(locked.header(), header.len(), locked.payload())?;
    let preamble = FlattenPreamble {
        name: name.to_owned(),
        schema_ids: schemas.iter().map(|s| s.id()).collect(),
    };

    let mut first = BytesMut::new();
    preamble.put(&mut first)?;
    prologue.put(&mut first);
    tracing::debug!(name, schemas = preamble.schema_ids.len(), "flattened message");
    Ok(WireSlices {
        first: first.freeze(),
        header,
        payload,
    })
}

fn build_part(
    registry: &Arc<SchemaRegistry>,
    access: Option<Arc<Schema>>,
    version: u16,
    id: SchemaId,
    body: Bytes,
) -> Result<MessagePart> {
    MessagePart::from_bytes(registry, access, version, id, body).map_err(PartwireError::into_decode_failure)
}

fn build_message(registry: &Arc<SchemaRegistry>, frame: Frame, access: &AccessSchemas) -> Result<MessageObject> {
    let p = frame.prologue;
    let original_length = frame.wire_len();

    let header = build_part(
        registry,
        access.header.clone(),
        p.header_version,
        p.header_schema,
        frame.header,
    )?;
    let payload = match frame.payload {
        Some(body) => Some(build_part(
            registry,
            access.payload.clone(),
            p.payload_version,
            p.payload_schema,
            body,
        )?),
        None if access.payload.is_some() => {
            return Err(PartwireError::decode(
                "payload access schema given for a header-only message",
            ));
        }
        None => None,
    };
    tracing::debug!(
        header_schema = p.header_schema,
        payload_schema = p.payload_schema,
        original_length,
        "decoded message"
    );
    Ok(MessageObject::from_parts(header, payload, original_length))
}

/// Decode a single-buffer frame (header-only, or header followed by payload).
pub fn decode_single(registry: &Arc<SchemaRegistry>, bytes: Bytes, access: &AccessSchemas) -> Result<MessageObject> {
    let frame = Frame::parse_single(bytes)?;
    build_message(registry, frame, access)
}

fn frame_from_slices(slices: &[Bytes]) -> Result<Frame> {
    match slices {
        [single] => Frame::parse_single(single.clone()),
        [prologue, header] => Frame::from_slices(prologue.clone(), header.clone(), None),
        [prologue, header, payload] => {
            Frame::from_slices(prologue.clone(), header.clone(), Some(payload.clone()))
        }
        _ => Err(PartwireError::decode(format!(
            "expected 1 to 3 slices, got {}",
            slices.len()
        ))),
    }
}

/// Decode `encode_wire` slices. A single slice is treated as a single buffer.
pub fn decode_slices(
    registry: &Arc<SchemaRegistry>,
    slices: &[Bytes],
    access: &AccessSchemas,
) -> Result<MessageObject> {
    build_message(registry, frame_from_slices(slices)?, access)
}

/// Inverse of `flatten`. Listed schemas the registry lacks are loaded from
/// `store` before decoding.
pub fn restore(
    registry: &Arc<SchemaRegistry>,
    slices: &[Bytes],
    store: Option<&dyn SchemaStore>,
) -> Result<Restored> {
    let Some((first, rest)) = slices.split_first() else {
        return Err(PartwireError::decode("no slices to restore"));
    };
    let mut first = first.clone();
    let preamble = FlattenPreamble::parse(&mut first)?;

    if let Some(store) = store {
        for id in registry.missing(&preamble.schema_ids) {
            match store.load_schema(id).map_err(PartwireError::into_decode_failure)? {
                Some(schema) if schema.id() == id => {
                    registry.register(schema);
                }
                Some(_) => {
                    return Err(PartwireError::decode_in(id, "stored schema does not match its id"));
                }
                None => tracing::warn!(schema_id = id, "listed schema missing from store"),
            }
        }
    }

    let frame = match rest {
        [header] => Frame::from_slices(first, header.clone(), None)?,
        [header, payload] => Frame::from_slices(first, header.clone(), Some(payload.clone()))?,
        _ => {
            return Err(PartwireError::decode(format!(
                "expected 2 or 3 flattened slices, got {}",
                slices.len()
            )));
        }
    };
    let message = build_message(registry, frame, &AccessSchemas::default())?;
    Ok(Restored {
        name: preamble.name,
        schema_ids: preamble.schema_ids,
        message,
    })
}

fn missing_in(registry: &Arc<SchemaRegistry>, id: SchemaId, body: &Bytes, out: &mut Vec<SchemaId>) -> Result<()> {
    let Some(schema) = registry.get(id) else {
        if !out.contains(&id) {
            out.push(id);
        }
        return Ok(());
    };
    let mut scan = wire::Scan::default();
    wire::scan(registry, &schema, body, &mut scan)?;
    for m in scan.missing {
        if !out.contains(&m) {
            out.push(m);
        }
    }
    Ok(())
}

/// Schema ids a decode of `slices` (wire or single-buffer form) cannot
/// resolve yet. Nested ids only show up once their parent's schema is known,
/// so callers resolve in rounds until this is empty.
pub fn missing_schemas(registry: &Arc<SchemaRegistry>, slices: &[Bytes]) -> Result<Vec<SchemaId>> {
    let frame = frame_from_slices(slices)?;
    let mut out = Vec::new();
    missing_in(registry, frame.prologue.header_schema, &frame.header, &mut out)?;
    if let Some(payload) = &frame.payload {
        missing_in(registry, frame.prologue.payload_schema, payload, &mut out)?;
    }
    Ok(out)
}
