use crate::error::Result;
use crate::schema::{Accessor, FieldInfo, Schema, Shape};

use super::{MessagePart, Value};

/// One decoded field, indexed by accessor.
#[derive(Debug)]
pub(crate) enum Slot {
    Value(Value),
    Part(Option<MessagePart>),
    Choice(u32),
}

impl Slot {
    fn default_for(info: &FieldInfo) -> Slot {
        match &info.shape {
            Shape::Scalar(_) | Shape::List(_) => Slot::Value(Value::Null),
            Shape::Part => Slot::Part(None),
            Shape::Choice { initial, .. } => Slot::Choice(*initial),
        }
    }
}

/// Fluffed form of a part: one slot per accessor of the encoding schema.
///
/// Slots below an unselected variant always hold their defaults.
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) slots: Vec<Slot>,
}

impl Tree {
    pub(crate) fn empty(schema: &Schema) -> Self {
        let slots = (0..schema.field_count())
            .map(|i| Slot::default_for(schema.info(Accessor::from_index(i))))
            .collect();
        Self { slots }
    }

    pub(crate) fn variant_of(&self, choice: Accessor) -> Option<u32> {
        match self.slots.get(choice.index()) {
            Some(Slot::Choice(v)) => Some(*v),
            _ => None,
        }
    }

    /// All enclosing choice arms of `acc` are selected.
    pub(crate) fn is_present(&self, schema: &Schema, acc: Accessor) -> bool {
        schema
            .guards(acc)
            .iter()
            .all(|g| self.variant_of(g.choice) == Some(g.variant))
    }

    /// Select every enclosing arm of `acc`, outermost first. Returns whether
    /// anything changed.
    pub(crate) fn select_path(&mut self, schema: &Schema, acc: Accessor) -> bool {
        let mut changed = false;
        for g in schema.guards(acc).iter().rev() {
            changed |= self.switch_choice(schema, g.choice, g.variant);
        }
        changed
    }

    /// Switch a choice to `variant`, resetting everything nested under it.
    pub(crate) fn switch_choice(&mut self, schema: &Schema, choice: Accessor, variant: u32) -> bool {
        if self.variant_of(choice) == Some(variant) {
            return false;
        }
        let start = choice.index() + 1;
        let end = start + schema.info(choice).span as usize;
        for i in start..end {
            if let Some(slot) = self.slots.get_mut(i) {
                *slot = Slot::default_for(schema.info(Accessor::from_index(i)));
            }
        }
        if let Some(slot) = self.slots.get_mut(choice.index()) {
            *slot = Slot::Choice(variant);
        }
        true
    }

    pub(crate) fn parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Part(Some(p)) => Some(p),
            _ => None,
        })
    }

    /// Independent copy; nested parts are copied too, never aliased.
    pub(crate) fn deep_copy(&self) -> Result<Tree> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for s in &self.slots {
            slots.push(match s {
                Slot::Value(v) => Slot::Value(v.clone()),
                Slot::Choice(v) => Slot::Choice(*v),
                Slot::Part(None) => Slot::Part(None),
                Slot::Part(Some(p)) => Slot::Part(Some(p.copy()?)),
            });
        }
        Ok(Tree { slots })
    }
}
