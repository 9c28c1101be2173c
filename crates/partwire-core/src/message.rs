//! Message object: one header part, an optional payload part, and the
//! message-level lock that serializes write-back with encode and copy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{PartwireError, Result};
use crate::part::{MessagePart, Value, Variant};
use crate::schema::{Accessor, Guard, Schema, SchemaId, SchemaRegistry, Shape};

/// Which part of a message a cached entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartRole {
    Header,
    Payload,
}

#[derive(Default)]
struct MessageCache {
    /// Values staged by `defer_set`, written into the parts on flush.
    pending: Vec<(PartRole, Accessor, Value)>,
    /// Sub-part handles handed out by `sub_part`.
    parts: HashMap<(PartRole, Accessor), MessagePart>,
}

pub struct MessageObject {
    header: MessagePart,
    payload: Option<MessagePart>,
    original_length: usize,
    cache: Mutex<MessageCache>,
}

impl std::fmt::Debug for MessageObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageObject")
            .field("header", &self.header)
            .field("payload", &self.payload)
            .field("original_length", &self.original_length)
            .finish_non_exhaustive()
    }
}

/// Lock guard handed to codec code: pending values are already written back.
pub(crate) struct Flushed<'a> {
    msg: &'a MessageObject,
    _guard: MutexGuard<'a, MessageCache>,
}

impl Flushed<'_> {
    pub(crate) fn header(&self) -> &MessagePart {
        &self.msg.header
    }

    pub(crate) fn payload(&self) -> Option<&MessagePart> {
        self.msg.payload.as_ref()
    }
}

impl MessageObject {
    /// Header-only message with an empty header part.
    pub fn new(registry: &Arc<SchemaRegistry>, header: impl Into<Arc<Schema>>) -> Self {
        Self::from_parts(MessagePart::new(registry, header), None, 0)
    }

    /// Message with empty header and payload parts.
    pub fn with_payload(
        registry: &Arc<SchemaRegistry>,
        header: impl Into<Arc<Schema>>,
        payload: impl Into<Arc<Schema>>,
    ) -> Self {
        Self::from_parts(
            MessagePart::new(registry, header),
            Some(MessagePart::new(registry, payload)),
            0,
        )
    }

    pub fn from_parts(header: MessagePart, payload: Option<MessagePart>, original_length: usize) -> Self {
        Self {
            header,
            payload,
            original_length,
            cache: Mutex::new(MessageCache::default()),
        }
    }

    pub fn header(&self) -> &MessagePart {
        &self.header
    }

    pub fn payload(&self) -> Option<&MessagePart> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Wire length this message was decoded from; `0` for messages built locally.
    pub fn original_length(&self) -> usize {
        self.original_length
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.header.registry()
    }

    fn part(&self, role: PartRole) -> Result<&MessagePart> {
        match role {
            PartRole::Header => Ok(&self.header),
            PartRole::Payload => self
                .payload
                .as_ref()
                .ok_or_else(|| PartwireError::SchemaViolation("message has no payload part".into())),
        }
    }

    /// Stage a value to be written into a part on the next flush, encode or
    /// copy. Staging the same field again replaces the staged value.
    pub fn defer_set(&self, role: PartRole, acc: Accessor, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let part = self.part(role)?;
        let shape = &part.schema().field(acc)?.shape;
        if !matches!(shape, Shape::Scalar(_) | Shape::List(_)) || !value.fits(shape) {
            return Err(PartwireError::SchemaViolation(format!(
                "value {value:?} does not fit {}",
                part.schema().field(acc)?.path
            )));
        }
        let mut cache = self.cache.lock();
        cache.pending.retain(|(r, a, _)| !(*r == role && *a == acc));
        cache.pending.push((role, acc, value));
        Ok(())
    }

    /// Staged value for a field, if any.
    pub fn deferred(&self, role: PartRole, acc: Accessor) -> Option<Value> {
        self.cache
            .lock()
            .pending
            .iter()
            .find(|(r, a, _)| *r == role && *a == acc)
            .map(|(_, _, v)| v.clone())
    }

    fn write_back(&self, cache: &mut MessageCache) -> Result<()> {
        if cache.pending.is_empty() {
            return Ok(());
        }
        tracing::trace!(count = cache.pending.len(), "writing back deferred fields");
        for (role, acc, value) in cache.pending.drain(..) {
            self.part(role)?.set(acc, value)?;
        }
        Ok(())
    }

    /// Write staged values into their parts.
    pub fn flush(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        self.write_back(&mut cache)
    }

    /// Take the message lock and write back staged values.
    pub(crate) fn lock_flushed(&self) -> Result<Flushed<'_>> {
        let mut guard = self.cache.lock();
        self.write_back(&mut guard)
            .map_err(|e| PartwireError::EncodeFailed(format!("write-back failed: {e}")))?;
        Ok(Flushed { msg: self, _guard: guard })
    }

    /// Cached sub-part handle for a part field.
    pub fn sub_part(&self, role: PartRole, acc: Accessor, schema: &Arc<Schema>) -> Result<Option<MessagePart>> {
        let mut cache = self.cache.lock();
        if let Some(p) = cache.parts.get(&(role, acc)) {
            if Arc::ptr_eq(p.schema(), schema) {
                return Ok(Some(p.clone()));
            }
        }
        let found = self.part(role)?.get_sub_part(acc, schema)?;
        if let Some(p) = &found {
            cache.parts.insert((role, acc), p.clone());
        }
        Ok(found)
    }

    /// Independent copy of this message.
    ///
    /// Staged values are written back and cached sub-part handles dropped
    /// before the parts are copied, all under the message lock.
    pub fn get_copy(&self) -> Result<MessageObject> {
        let mut cache = self.cache.lock();
        self.write_back(&mut cache).map_err(PartwireError::into_copy_failure)?;
        cache.parts.clear();
        let header = self.header.copy().map_err(PartwireError::into_copy_failure)?;
        let payload = match &self.payload {
            Some(p) => Some(p.copy().map_err(PartwireError::into_copy_failure)?),
            None => None,
        };
        Ok(MessageObject::from_parts(header, payload, 0))
    }

    /// Transitive schema ids: header ids, then payload ids, without duplicates.
    pub fn schema_ids(&self) -> Result<Vec<SchemaId>> {
        let mut ids = self.header.schema_ids()?;
        if let Some(p) = &self.payload {
            for id in p.schema_ids()? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub fn encoding_schemas(&self) -> Result<Vec<Arc<Schema>>> {
        let registry = self.registry();
        self.schema_ids()?
            .into_iter()
            .map(|id| {
                registry
                    .get(id)
                    .ok_or_else(|| PartwireError::EncodeFailed(format!("schema {id:#018x} not registered")))
            })
            .collect()
    }

    /// Header field, seeing staged values first.
    pub fn get(&self, acc: Accessor) -> Result<Option<Value>> {
        if let Some(v) = self.deferred(PartRole::Header, acc) {
            return Ok(Some(v));
        }
        self.header.get(acc)
    }

    /// Drop staged header values that sit under another arm of a choice in
    /// `selected`; writing them back would undo that selection.
    fn drop_deselected(&self, cache: &mut MessageCache, selected: &[Guard]) {
        let schema = self.header.schema();
        cache.pending.retain(|(r, a, _)| {
            *r != PartRole::Header
                || !schema.guards(*a).iter().any(|g| {
                    selected
                        .iter()
                        .any(|s| s.choice == g.choice && s.variant != g.variant)
                })
        });
    }

    /// Set a header field directly. Its own staged value and staged values
    /// under the choice arms it deselects are dropped.
    pub fn set(&self, acc: Accessor, value: impl Into<Value>) -> Result<()> {
        let mut cache = self.cache.lock();
        self.header.set(acc, value)?;
        cache.pending.retain(|(r, a, _)| !(*r == PartRole::Header && *a == acc));
        let selected = self.header.schema().guards(acc);
        self.drop_deselected(&mut cache, &selected);
        Ok(())
    }

    pub fn get_choice(&self, acc: Accessor) -> Result<Option<Variant>> {
        self.header.get_choice(acc)
    }

    /// Select a header choice variant. Staged values under the variants it
    /// deselects are dropped.
    pub fn set_choice(&self, acc: Accessor, variant: u32) -> Result<()> {
        let mut cache = self.cache.lock();
        self.header.set_choice(acc, variant)?;
        let mut selected = self.header.schema().guards(acc);
        selected.push(Guard { choice: acc, variant });
        self.drop_deselected(&mut cache, &selected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::schema::{FieldDef, ScalarType, SchemaDef, VariantDef};

    fn header() -> Schema {
        Schema::new(SchemaDef::new(
            "hdr",
            vec![
                FieldDef::scalar("priority", ScalarType::Int),
                FieldDef::part("props"),
            ],
        ))
        .unwrap()
    }

    fn props() -> Schema {
        Schema::new(SchemaDef::new("props", vec![FieldDef::scalar("k", ScalarType::String)])).unwrap()
    }

    fn routed() -> Schema {
        Schema::new(SchemaDef::new(
            "routed",
            vec![FieldDef::choice(
                "reply",
                vec![
                    VariantDef::empty("none"),
                    VariantDef::new("queue", vec![FieldDef::scalar("name", ScalarType::String)]),
                    VariantDef::new("topic", vec![FieldDef::list("segments", ScalarType::String)]),
                ],
            )],
        ))
        .unwrap()
    }

    #[test]
    fn switching_a_choice_drops_values_staged_under_other_variants() {
        let reg = SchemaRegistry::shared();
        let msg = MessageObject::new(&reg, routed());
        let s = Arc::clone(msg.header().schema());
        let reply = s.accessor("reply").unwrap();
        let queue = s.accessor("reply.queue.name").unwrap();
        let segments = s.accessor("reply.topic.segments").unwrap();

        msg.defer_set(PartRole::Header, queue, "q").unwrap();
        msg.set_choice(reply, 2).unwrap();
        assert!(msg.deferred(PartRole::Header, queue).is_none());

        // Values under the selected variant stay staged.
        msg.defer_set(PartRole::Header, segments, Value::List(vec![Value::from("a")])).unwrap();
        msg.set_choice(reply, 2).unwrap();
        msg.flush().unwrap();
        assert_eq!(msg.get_choice(reply).unwrap().unwrap().name, "topic");
        assert_eq!(msg.get(queue).unwrap(), None);
        assert_eq!(msg.get(segments).unwrap(), Some(Value::List(vec![Value::from("a")])));

        // A direct set deselects staged values the same way.
        msg.defer_set(PartRole::Header, segments, Value::List(vec![])).unwrap();
        msg.set(queue, "direct").unwrap();
        msg.flush().unwrap();
        assert_eq!(msg.get_choice(reply).unwrap().unwrap().name, "queue");
        assert_eq!(msg.get(segments).unwrap(), None);
    }

    #[test]
    fn deferred_values_are_written_back_on_copy() {
        let reg = SchemaRegistry::shared();
        let msg = MessageObject::new(&reg, header());
        let prio = msg.header().schema().accessor("priority").unwrap();
        msg.defer_set(PartRole::Header, prio, 4).unwrap();
        assert_eq!(msg.header().get(prio).unwrap(), Some(Value::Null));
        assert_eq!(msg.get(prio).unwrap(), Some(Value::Int(4)));

        let copy = msg.get_copy().unwrap();
        assert_eq!(copy.header().get(prio).unwrap(), Some(Value::Int(4)));
        assert_eq!(msg.header().get(prio).unwrap(), Some(Value::Int(4)));
        assert!(msg.deferred(PartRole::Header, prio).is_none());
    }

    #[test]
    fn deferred_type_mismatch_is_rejected() {
        let reg = SchemaRegistry::shared();
        let msg = MessageObject::new(&reg, header());
        let prio = msg.header().schema().accessor("priority").unwrap();
        assert!(msg.defer_set(PartRole::Header, prio, "x").is_err());
        assert!(msg.defer_set(PartRole::Payload, prio, 1).is_err());
    }

    #[test]
    fn copy_drops_cached_sub_parts() {
        let reg = SchemaRegistry::shared();
        let msg = MessageObject::new(&reg, header());
        let acc = msg.header().schema().accessor("props").unwrap();
        let props = msg.header().new_sub_part(acc, props()).unwrap();
        let schema = Arc::clone(props.schema());

        let cached = msg.sub_part(PartRole::Header, acc, &schema).unwrap().unwrap();
        assert!(cached.same_part(&props));

        let copy = msg.get_copy().unwrap();
        let k = schema.accessor("k").unwrap();
        cached.set(k, "original").unwrap();
        let copied = copy.header().get_sub_part(acc, &schema).unwrap().unwrap();
        assert_eq!(copied.get(k).unwrap(), Some(Value::Null));
        assert!(!msg.sub_part(PartRole::Header, acc, &schema).unwrap().unwrap().same_part(&copied));
    }
}
