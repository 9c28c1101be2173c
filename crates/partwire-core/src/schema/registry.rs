use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{PartwireError, Result};

use super::{Schema, SchemaId};

/// Append-only schema directory: `schema id -> Schema`.
///
/// Entries are never replaced or removed. Shared as `Arc<SchemaRegistry>`
/// through every part and codec call; tests build a fresh one each.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<SchemaId, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
        }
    }

    /// Shorthand for the common `Arc::new(SchemaRegistry::new())`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a schema. Re-registering a known id keeps the existing entry
    /// and returns it.
    pub fn register(&self, schema: impl Into<Arc<Schema>>) -> Arc<Schema> {
        let schema = schema.into();
        let id = schema.id();
        let entry = self.schemas.entry(id).or_insert_with(|| {
            tracing::debug!(schema_id = id, name = schema.name(), "schema registered");
            schema
        });
        Arc::clone(entry.value())
    }

    pub fn register_all<I>(&self, schemas: I) -> Vec<Arc<Schema>>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Schema>>,
    {
        schemas.into_iter().map(|s| self.register(s)).collect()
    }

    pub fn get(&self, id: SchemaId) -> Option<Arc<Schema>> {
        self.schemas.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Like `get`, but an unknown id is a decode failure.
    pub fn retrieve(&self, id: SchemaId) -> Result<Arc<Schema>> {
        self.get(id)
            .ok_or_else(|| PartwireError::decode_in(id, "no schema registered for id"))
    }

    pub fn contains(&self, id: SchemaId) -> bool {
        self.schemas.contains_key(&id)
    }

    /// Ids from `ids` that are not registered (order kept, duplicates dropped).
    pub fn missing(&self, ids: &[SchemaId]) -> Vec<SchemaId> {
        let mut out: Vec<SchemaId> = Vec::new();
        for id in ids {
            if !self.contains(*id) && !out.contains(id) {
                out.push(*id);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn ids(&self) -> Vec<SchemaId> {
        self.schemas.iter().map(|e| *e.key()).collect()
    }
}
