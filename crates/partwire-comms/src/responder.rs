//! Answering side of schema negotiation.

use std::sync::Arc;

use partwire_core::schema::{Schema, SchemaId, SchemaRegistry};

/// Schemas for `ids` known to `registry`. Unknown ids are left out of the
/// reply rather than failing the whole request.
pub fn answer_request(registry: &SchemaRegistry, ids: &[SchemaId]) -> Vec<Arc<Schema>> {
    let mut out = Vec::with_capacity(ids.len());
    for &id in ids {
        match registry.get(id) {
            Some(s) => out.push(s),
            None => tracing::debug!(schema_id = id, "requested schema unknown here"),
        }
    }
    out
}

/// Register schemas pushed by a peer. Returns how many were new.
pub fn receive_pushed(registry: &SchemaRegistry, schemas: &[Arc<Schema>]) -> usize {
    let mut added = 0;
    for s in schemas {
        if !registry.contains(s.id()) {
            added += 1;
        }
        registry.register(Arc::clone(s));
    }
    if added > 0 {
        tracing::debug!(added, total = schemas.len(), "pushed schemas registered");
    }
    added
}
