//! Durable schema storage contract used by flatten/restore.
//!
//! A flattened message may be read back long after the registry that wrote it
//! is gone, so every schema it references must live next to it in the store.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;

use super::{Schema, SchemaId};

pub trait SchemaStore: Send + Sync {
    /// Durably record schemas. Already-stored ids are skipped.
    fn save_schemas(&self, schemas: &[Arc<Schema>]) -> Result<()>;

    /// Load a stored schema, `None` when the id was never saved.
    fn load_schema(&self, id: SchemaId) -> Result<Option<Schema>>;
}

/// In-memory store holding serialized definitions, as a real store would.
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    defs: DashMap<SchemaId, Vec<u8>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self {
            defs: DashMap::new(),
        }
    }

    pub fn contains(&self, id: SchemaId) -> bool {
        self.defs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl SchemaStore for MemorySchemaStore {
    fn save_schemas(&self, schemas: &[Arc<Schema>]) -> Result<()> {
        for s in schemas {
            if self.defs.contains_key(&s.id()) {
                continue;
            }
            let bytes = s.to_bytes()?;
            self.defs.entry(s.id()).or_insert(bytes);
        }
        Ok(())
    }

    fn load_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        let Some(bytes) = self.defs.get(&id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        Schema::from_bytes(&bytes).map(Some)
    }
}
