//! Per-connection schema negotiation.
//!
//! Send side: before a message goes out, every schema it needs that this
//! connection has not pushed yet is pushed to the peer. The set of pushed
//! ids is only a hint; a peer that lost them simply requests them again.
//!
//! Receive side: before a message is decoded, every schema id it references
//! that the local registry lacks is requested from the peer, in rounds
//! (nested ids only become visible once their parent schema is known). Each
//! request is bounded by `request_timeout_ms`; failure of any kind fails the
//! decode with `DecodeFailed` naming the unresolved schema.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashSet;
use tokio::time::{timeout, Instant};

use partwire_core::codec::{self, AccessSchemas, WireSlices};
use partwire_core::error::{PartwireError, Result};
use partwire_core::schema::{Schema, SchemaId, SchemaRegistry};
use partwire_core::MessageObject;

use crate::config::{CodecConfig, NegotiatorConfig, PartwireConfig};
use crate::peer::SchemaPeer;
use crate::responder;
use crate::stats::NegotiationStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// At least one decode is blocked on a schema request.
    AwaitingSchemas,
}

struct Awaiting<'a>(&'a AtomicUsize);

impl<'a> Awaiting<'a> {
    fn enter(n: &'a AtomicUsize) -> Self {
        n.fetch_add(1, Ordering::AcqRel);
        Self(n)
    }
}

impl Drop for Awaiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Negotiator {
    registry: Arc<SchemaRegistry>,
    peer: Arc<dyn SchemaPeer>,
    cfg: NegotiatorConfig,
    codec: CodecConfig,
    /// Ids already pushed on this connection.
    sent: DashSet<SchemaId>,
    awaiting: AtomicUsize,
    stats: Arc<NegotiationStats>,
}

impl Negotiator {
    pub fn new(registry: Arc<SchemaRegistry>, peer: Arc<dyn SchemaPeer>, cfg: NegotiatorConfig) -> Self {
        Self {
            registry,
            peer,
            cfg,
            codec: CodecConfig::default(),
            sent: DashSet::new(),
            awaiting: AtomicUsize::new(0),
            stats: Arc::new(NegotiationStats::default()),
        }
    }

    pub fn from_config(registry: Arc<SchemaRegistry>, peer: Arc<dyn SchemaPeer>, cfg: &PartwireConfig) -> Self {
        let mut n = Self::new(registry, peer, cfg.negotiation.clone());
        n.codec = cfg.codec.clone();
        n
    }

    /// Share counters with other negotiators (e.g. one set per process).
    pub fn with_stats(mut self, stats: Arc<NegotiationStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<NegotiationStats> {
        &self.stats
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn state(&self) -> NegotiationState {
        if self.awaiting.load(Ordering::Acquire) > 0 {
            NegotiationState::AwaitingSchemas
        } else {
            NegotiationState::Idle
        }
    }

    /// Whether `id` was already pushed on this connection.
    pub fn peer_knows(&self, id: SchemaId) -> bool {
        self.sent.contains(&id)
    }

    /// Forget what was pushed (new session on the same connection object).
    pub fn reset_session(&self) {
        self.sent.clear();
    }

    /// Push every schema `msg` needs that has not been pushed yet.
    ///
    /// A failed push is logged and the ids stay unrecorded so the next
    /// message retries them; the caller's encode goes ahead regardless.
    pub async fn ensure_peer_has(&self, msg: &MessageObject) -> Result<()> {
        if !self.cfg.push_schemas {
            return Ok(());
        }
        let unsent: Vec<Arc<Schema>> = msg
            .encoding_schemas()?
            .into_iter()
            .filter(|s| !self.sent.contains(&s.id()))
            .collect();
        if unsent.is_empty() {
            return Ok(());
        }

        match self.peer.push_schemas(&unsent).await {
            Ok(()) => {
                for s in &unsent {
                    self.sent.insert(s.id());
                }
                self.stats.schemas_pushed.add(&[], unsent.len() as u64);
                tracing::debug!(count = unsent.len(), "schemas pushed to peer");
            }
            Err(e) => {
                self.stats.push_failures.inc(&[]);
                tracing::warn!(error = %e, count = unsent.len(), "schema push failed");
            }
        }
        Ok(())
    }

    /// `ensure_peer_has` followed by `codec::encode_wire`.
    pub async fn encode_for_peer(&self, msg: &MessageObject) -> Result<WireSlices> {
        self.ensure_peer_has(msg).await?;
        codec::encode_wire(msg)
    }

    /// Resolve every schema `slices` reference, then decode.
    pub async fn decode(&self, slices: &[Bytes], access: &AccessSchemas) -> Result<MessageObject> {
        let total: usize = slices.iter().map(Bytes::len).sum();
        if total > self.codec.max_frame_bytes {
            return Err(PartwireError::decode(format!(
                "message of {total} bytes exceeds max_frame_bytes {}",
                self.codec.max_frame_bytes
            )));
        }

        loop {
            let missing = codec::missing_schemas(&self.registry, slices)?;
            if missing.is_empty() {
                break;
            }
            for batch in missing.chunks(self.cfg.max_request_batch.max(1)) {
                self.fetch(batch).await?;
            }
        }
        codec::decode_slices(&self.registry, slices, access)
    }

    async fn fetch(&self, ids: &[SchemaId]) -> Result<()> {
        let first = ids.first().copied().unwrap_or_default();
        let _awaiting = Awaiting::enter(&self.awaiting);
        self.stats.schemas_requested.add(&[], ids.len() as u64);
        tracing::debug!(count = ids.len(), first_schema = first, "requesting schemas from peer");

        let started = Instant::now();
        let reply = timeout(self.cfg.request_timeout(), self.peer.request_schemas(ids)).await;
        self.stats.request_wait.observe(started.elapsed());

        let schemas = match reply {
            Err(_) => {
                self.stats.request_failures.inc(&[("reason", "timeout")]);
                tracing::warn!(
                    schema_id = first,
                    timeout_ms = self.cfg.request_timeout_ms,
                    "schema request timed out"
                );
                return Err(PartwireError::decode_in(first, "schema request timed out"));
            }
            Ok(Err(e)) => {
                self.stats.request_failures.inc(&[("reason", "peer_error")]);
                tracing::warn!(schema_id = first, error = %e, "schema request failed");
                let id = e.schema_id().unwrap_or(first);
                return Err(PartwireError::decode_in(id, format!("schema request failed: {e}")));
            }
            Ok(Ok(schemas)) => schemas,
        };

        self.stats.schemas_received.add(&[], schemas.len() as u64);
        self.registry.register_all(schemas);

        if let Some(&id) = ids.iter().find(|id| !self.registry.contains(**id)) {
            self.stats.request_failures.inc(&[("reason", "incomplete")]);
            tracing::warn!(schema_id = id, "peer did not supply a requested schema");
            return Err(PartwireError::decode_in(id, "schema unavailable from peer"));
        }
        Ok(())
    }

    /// Serve a peer's schema request from the local registry.
    pub fn answer_request(&self, ids: &[SchemaId]) -> Vec<Arc<Schema>> {
        let out = responder::answer_request(&self.registry, ids);
        self.stats.schemas_served.add(&[], out.len() as u64);
        out
    }

    /// Register schemas a peer pushed. Returns how many were new.
    pub fn receive_pushed(&self, schemas: &[Arc<Schema>]) -> usize {
        let added = responder::receive_pushed(&self.registry, schemas);
        self.stats.schemas_received.add(&[], schemas.len() as u64);
        added
    }
}
