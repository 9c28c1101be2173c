//! Schema-described message parts.
//!
//! A part holds its encoded body, its decoded ("fluffed") tree, or both.
//! Bodies are decoded lazily on first field access and re-encoded lazily on
//! `encode`; an untouched part hands its original bytes back unchanged.
//! Nested parts decoded from a body share that body's buffer until touched.
//!
//! `MessagePart` is a handle: cloning it aliases the same part (so a sub-part
//! fetched from a parent can be mutated in place). `copy` produces an
//! independent part that shares bytes copy-on-write.

mod tree;
mod value;
pub(crate) mod wire;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{PartwireError, Result};
use crate::protocol::frame::ENCODING_VERSION;
use crate::schema::{Accessor, Schema, SchemaId, SchemaRegistry, Shape};

use tree::{Slot, Tree};
pub use value::Value;
pub use wire::MAX_NESTING_DEPTH;

/// Selected arm of a choice field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub index: u32,
    pub name: String,
}

struct PartState {
    /// Encoded body; `None` once a field was written since the last encode.
    raw: Option<Bytes>,
    tree: Option<Tree>,
}

struct PartCell {
    registry: Arc<SchemaRegistry>,
    encoding: Arc<Schema>,
    version: u16,
    state: Mutex<PartState>,
}

#[derive(Clone)]
pub struct MessagePart {
    /// Schema callers address fields through; compatible with `encoding`.
    access: Arc<Schema>,
    cell: Arc<PartCell>,
}

impl fmt::Debug for MessagePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePart")
            .field("access", &self.access.name())
            .field("encoding_id", &self.cell.encoding.id())
            .field("version", &self.cell.version)
            .finish_non_exhaustive()
    }
}

impl MessagePart {
    /// New empty part. The schema is registered so the part can always be
    /// encoded and its schemas shipped.
    pub fn new(registry: &Arc<SchemaRegistry>, schema: impl Into<Arc<Schema>>) -> Self {
        let schema = registry.register(schema);
        let tree = Tree::empty(&schema);
        Self::build(
            Arc::clone(registry),
            Arc::clone(&schema),
            schema,
            ENCODING_VERSION,
            PartState {
                raw: None,
                tree: Some(tree),
            },
        )
    }

    /// Wrap an encoded body.
    ///
    /// The body is validated up front (nested bodies included) but not
    /// fluffed. `access` defaults to the encoding schema and must be
    /// compatible with it.
    pub fn from_bytes(
        registry: &Arc<SchemaRegistry>,
        access: Option<Arc<Schema>>,
        version: u16,
        encoding_id: SchemaId,
        body: Bytes,
    ) -> Result<Self> {
        if version != ENCODING_VERSION {
            return Err(PartwireError::decode_in(
                encoding_id,
                format!("unsupported encoding version {version}"),
            ));
        }
        let encoding = registry.retrieve(encoding_id)?;
        let access = match access {
            Some(a) if !a.is_compatible(&encoding) => {
                return Err(PartwireError::decode_in(
                    encoding_id,
                    format!(
                        "access schema {} is not compatible with encoding schema {}",
                        a.name(),
                        encoding.name()
                    ),
                ));
            }
            Some(a) => a,
            None => Arc::clone(&encoding),
        };

        let mut scan = wire::Scan::default();
        wire::scan(registry, &encoding, &body, &mut scan)?;
        if let Some(&id) = scan.missing.first() {
            return Err(PartwireError::decode_in(id, "nested part schema not registered"));
        }

        Ok(Self::from_trusted(Arc::clone(registry), access, encoding, version, body))
    }

    /// Wrap a body that has already been validated.
    pub(crate) fn from_trusted(
        registry: Arc<SchemaRegistry>,
        access: Arc<Schema>,
        encoding: Arc<Schema>,
        version: u16,
        body: Bytes,
    ) -> Self {
        Self::build(
            registry,
            access,
            encoding,
            version,
            PartState {
                raw: Some(body),
                tree: None,
            },
        )
    }

    fn build(
        registry: Arc<SchemaRegistry>,
        access: Arc<Schema>,
        encoding: Arc<Schema>,
        version: u16,
        state: PartState,
    ) -> Self {
        Self {
            access,
            cell: Arc::new(PartCell {
                registry,
                encoding,
                version,
                state: Mutex::new(state),
            }),
        }
    }

    /// The same part viewed through another compatible schema.
    pub fn with_access(&self, schema: Arc<Schema>) -> Result<Self> {
        if !schema.is_compatible(&self.cell.encoding) {
            return Err(PartwireError::SchemaViolation(format!(
                "schema {} is not compatible with {}",
                schema.name(),
                self.cell.encoding.name()
            )));
        }
        Ok(Self {
            access: schema,
            cell: Arc::clone(&self.cell),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.access
    }

    pub fn encoding_schema(&self) -> &Arc<Schema> {
        &self.cell.encoding
    }

    pub fn encoding_id(&self) -> SchemaId {
        self.cell.encoding.id()
    }

    pub fn version(&self) -> u16 {
        self.cell.version
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.cell.registry
    }

    /// Both handles refer to the same underlying part.
    pub fn same_part(&self, other: &MessagePart) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Lock the state with the tree materialized.
    fn fluffed(&self) -> Result<MutexGuard<'_, PartState>> {
        let mut state = self.cell.state.lock();
        if state.tree.is_none() {
            let Some(raw) = state.raw.as_ref() else {
                return Err(PartwireError::Internal("part has neither body nor tree".into()));
            };
            tracing::trace!(schema_id = self.encoding_id(), len = raw.len(), "fluffing part");
            let tree = wire::decode_tree(
                &self.cell.registry,
                &self.cell.encoding,
                self.cell.version,
                raw,
            )?;
            state.tree = Some(tree);
        }
        Ok(state)
    }

    fn tree_mut<'g>(state: &'g mut MutexGuard<'_, PartState>) -> Result<&'g mut Tree> {
        state
            .tree
            .as_mut()
            .ok_or_else(|| PartwireError::Internal("part tree missing after fluff".into()))
    }

    fn shape_of(&self, acc: Accessor) -> Result<&Shape> {
        Ok(&self.access.field(acc)?.shape)
    }

    fn violation(&self, acc: Accessor, what: &str) -> PartwireError {
        PartwireError::SchemaViolation(format!(
            "{} is not {what} in schema {}",
            self.access.info(acc).path,
            self.access.name()
        ))
    }

    /// Value of a scalar or list field; `None` when the field is not present
    /// because an enclosing choice selects another variant.
    pub fn get(&self, acc: Accessor) -> Result<Option<Value>> {
        if !matches!(self.shape_of(acc)?, Shape::Scalar(_) | Shape::List(_)) {
            return Err(self.violation(acc, "a value field"));
        }
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        if !tree.is_present(&self.access, acc) {
            return Ok(None);
        }
        match tree.slots.get(acc.index()) {
            Some(Slot::Value(v)) => Ok(Some(v.clone())),
            _ => Err(PartwireError::Internal("value slot has the wrong kind".into())),
        }
    }

    /// Whether a field exists under the current choice selections.
    pub fn is_present(&self, acc: Accessor) -> Result<bool> {
        self.access.field(acc)?;
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        Ok(tree.is_present(&self.access, acc))
    }

    /// Set a scalar or list field. Enclosing choices are switched to the
    /// variants containing it, clearing whatever those choices held before.
    pub fn set(&self, acc: Accessor, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let shape = self.shape_of(acc)?;
        if !matches!(shape, Shape::Scalar(_) | Shape::List(_)) {
            return Err(self.violation(acc, "a value field"));
        }
        if !value.fits(shape) {
            return Err(PartwireError::SchemaViolation(format!(
                "value {value:?} does not fit {} ({shape:?})",
                self.access.info(acc).path
            )));
        }
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        tree.select_path(&self.access, acc);
        if let Some(slot) = tree.slots.get_mut(acc.index()) {
            *slot = Slot::Value(value);
        }
        state.raw = None;
        Ok(())
    }

    /// Currently selected variant, or `None` when the choice itself is not
    /// present.
    pub fn get_choice(&self, acc: Accessor) -> Result<Option<Variant>> {
        let Shape::Choice { variants, .. } = self.shape_of(acc)? else {
            return Err(self.violation(acc, "a choice"));
        };
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        if !tree.is_present(&self.access, acc) {
            return Ok(None);
        }
        let index = tree
            .variant_of(acc)
            .ok_or_else(|| PartwireError::Internal("choice slot has the wrong kind".into()))?;
        let name = variants
            .get(index as usize)
            .map(|v| v.name.clone())
            .ok_or_else(|| PartwireError::Internal(format!("variant {index} out of range")))?;
        Ok(Some(Variant { index, name }))
    }

    /// Select a variant by index. Selecting the current variant is a no-op;
    /// selecting another one resets every field nested under the choice.
    pub fn set_choice(&self, acc: Accessor, variant: u32) -> Result<()> {
        let Shape::Choice { variants, .. } = self.shape_of(acc)? else {
            return Err(self.violation(acc, "a choice"));
        };
        if variant as usize >= variants.len() {
            return Err(PartwireError::SchemaViolation(format!(
                "variant {variant} out of range for {}",
                self.access.info(acc).path
            )));
        }
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        let mut changed = tree.select_path(&self.access, acc);
        changed |= tree.switch_choice(&self.access, acc, variant);
        if changed {
            state.raw = None;
        }
        Ok(())
    }

    pub fn set_choice_named(&self, acc: Accessor, variant: &str) -> Result<()> {
        let index = self.access.variant_index(acc, variant)?;
        self.set_choice(acc, index)
    }

    /// Nested part viewed through `schema`; `None` when null or not present.
    pub fn get_sub_part(&self, acc: Accessor, schema: &Arc<Schema>) -> Result<Option<MessagePart>> {
        if !matches!(self.shape_of(acc)?, Shape::Part) {
            return Err(self.violation(acc, "a part field"));
        }
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        if !tree.is_present(&self.access, acc) {
            return Ok(None);
        }
        match tree.slots.get(acc.index()) {
            Some(Slot::Part(Some(p))) => p.with_access(Arc::clone(schema)).map(Some),
            Some(Slot::Part(None)) => Ok(None),
            _ => Err(PartwireError::Internal("part slot has the wrong kind".into())),
        }
    }

    /// Store `part` (aliased, not copied) in a part field; `None` clears it.
    pub fn set_sub_part(&self, acc: Accessor, part: Option<MessagePart>) -> Result<()> {
        if !matches!(self.shape_of(acc)?, Shape::Part) {
            return Err(self.violation(acc, "a part field"));
        }
        if let Some(p) = &part {
            if p.reaches(&self.cell) {
                return Err(PartwireError::SchemaViolation(
                    "a part cannot contain itself".into(),
                ));
            }
            self.cell.registry.register(Arc::clone(&p.cell.encoding));
        }
        let mut state = self.fluffed()?;
        let tree = Self::tree_mut(&mut state)?;
        tree.select_path(&self.access, acc);
        if let Some(slot) = tree.slots.get_mut(acc.index()) {
            *slot = Slot::Part(part);
        }
        state.raw = None;
        Ok(())
    }

    /// Whether `target` is this part or sits anywhere below it.
    fn reaches(&self, target: &Arc<PartCell>) -> bool {
        if Arc::ptr_eq(&self.cell, target) {
            return true;
        }
        // Children are collected first so no two part locks are held at once.
        let children: Vec<MessagePart> = {
            let state = self.cell.state.lock();
            state
                .tree
                .as_ref()
                .map(|t| t.parts().cloned().collect())
                .unwrap_or_default()
        };
        children.iter().any(|c| c.reaches(target))
    }

    /// Create an empty part of `schema`, store it in `acc`, and return it.
    pub fn new_sub_part(&self, acc: Accessor, schema: impl Into<Arc<Schema>>) -> Result<MessagePart> {
        let part = MessagePart::new(&self.cell.registry, schema);
        self.set_sub_part(acc, Some(part.clone()))?;
        Ok(part)
    }

    fn assembled(state: &PartState) -> bool {
        state.raw.is_some()
            && state
                .tree
                .as_ref()
                .map_or(true, |t| t.parts().all(MessagePart::is_assembled))
    }

    /// The body is current for this part and every nested part.
    pub fn is_assembled(&self) -> bool {
        Self::assembled(&self.cell.state.lock())
    }

    /// Current body without re-encoding, if assembled.
    pub fn assembled_bytes(&self) -> Option<Bytes> {
        let state = self.cell.state.lock();
        if Self::assembled(&state) {
            state.raw.clone()
        } else {
            None
        }
    }

    /// Body bytes, re-encoding only what changed.
    pub fn encode(&self) -> Result<Bytes> {
        let mut state = self.cell.state.lock();
        if Self::assembled(&state) {
            if let Some(raw) = &state.raw {
                return Ok(raw.clone());
            }
        }
        let Some(tree) = state.tree.as_ref() else {
            return Err(PartwireError::EncodeFailed("part has no tree to encode".into()));
        };
        let body = wire::encode_tree(&self.cell.encoding, tree)?;
        tracing::trace!(schema_id = self.encoding_id(), len = body.len(), "part assembled");
        state.raw = Some(body.clone());
        Ok(body)
    }

    pub fn encoded_len(&self) -> Result<usize> {
        Ok(self.encode()?.len())
    }

    /// Independent copy. Assembled parts share their body; dirty parts copy
    /// their tree, nested parts included.
    pub fn copy(&self) -> Result<MessagePart> {
        let state = self.cell.state.lock();
        let next = if Self::assembled(&state) {
            PartState {
                raw: state.raw.clone(),
                tree: None,
            }
        } else {
            let tree = state
                .tree
                .as_ref()
                .ok_or_else(|| PartwireError::CopyFailed("dirty part without a tree".into()))?;
            PartState {
                raw: None,
                tree: Some(tree.deep_copy()?),
            }
        };
        drop(state);
        Ok(Self::build(
            Arc::clone(&self.cell.registry),
            Arc::clone(&self.access),
            Arc::clone(&self.cell.encoding),
            self.cell.version,
            next,
        ))
    }

    /// Ids of every schema needed to decode this part: its own first, then
    /// nested ones in first-seen order.
    pub fn schema_ids(&self) -> Result<Vec<SchemaId>> {
        let mut out = vec![self.encoding_id()];
        self.nested_ids(&mut out)?;
        Ok(out)
    }

    fn nested_ids(&self, out: &mut Vec<SchemaId>) -> Result<()> {
        let state = self.cell.state.lock();
        match (&state.tree, &state.raw) {
            (Some(tree), _) => {
                for p in tree.parts() {
                    if !out.contains(&p.encoding_id()) {
                        out.push(p.encoding_id());
                    }
                    p.nested_ids(out)?;
                }
            }
            (None, Some(raw)) => {
                let mut scan = wire::Scan::default();
                wire::scan(&self.cell.registry, &self.cell.encoding, raw, &mut scan)?;
                for id in scan.ids {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
            (None, None) => {
                return Err(PartwireError::Internal("part has neither body nor tree".into()));
            }
        }
        Ok(())
    }

    /// Schemas for `schema_ids`, resolved from the registry.
    pub fn encoding_schemas(&self) -> Result<Vec<Arc<Schema>>> {
        self.schema_ids()?
            .into_iter()
            .map(|id| {
                self.cell
                    .registry
                    .get(id)
                    .ok_or_else(|| PartwireError::EncodeFailed(format!("schema {id:#018x} not registered")))
            })
            .collect()
    }
}
