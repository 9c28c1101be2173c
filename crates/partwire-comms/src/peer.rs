//! Connection-side primitives the negotiator talks through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use partwire_core::error::Result;
use partwire_core::schema::{Schema, SchemaId, SchemaRegistry};

use crate::responder;

/// The remote end of one connection, as far as schemas are concerned.
///
/// Implementations own the actual transport. A reply to `request_schemas`
/// may omit ids the peer does not know; the negotiator treats those as
/// unavailable.
#[async_trait]
pub trait SchemaPeer: Send + Sync {
    /// Ask the peer for schema definitions.
    async fn request_schemas(&self, ids: &[SchemaId]) -> Result<Vec<Arc<Schema>>>;

    /// Send schema definitions the peer is about to need.
    async fn push_schemas(&self, schemas: &[Arc<Schema>]) -> Result<()>;
}

/// In-process peer backed by the other side's registry.
///
/// Requests are answered and pushes absorbed exactly as a remote
/// `Negotiator` would. An optional delay models a slow link.
pub struct LoopbackPeer {
    remote: Arc<SchemaRegistry>,
    delay: Option<Duration>,
}

impl LoopbackPeer {
    pub fn new(remote: Arc<SchemaRegistry>) -> Self {
        Self {
            remote,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn remote(&self) -> &Arc<SchemaRegistry> {
        &self.remote
    }

    async fn link(&self) {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl SchemaPeer for LoopbackPeer {
    async fn request_schemas(&self, ids: &[SchemaId]) -> Result<Vec<Arc<Schema>>> {
        self.link().await;
        Ok(responder::answer_request(&self.remote, ids))
    }

    async fn push_schemas(&self, schemas: &[Arc<Schema>]) -> Result<()> {
        self.link().await;
        responder::receive_pushed(&self.remote, schemas);
        Ok(())
    }
}
