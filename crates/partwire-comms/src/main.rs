//! Loopback demo: two negotiators in one process exchanging a message.
//!
//! - Config: `partwire.yaml` (or the path given as the first argument); the
//!   built-in defaults are used when the file does not exist.
//! - Logging: `RUST_LOG=debug` shows pushes, requests and decodes.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use partwire_comms::{config, LoopbackPeer, Negotiator};
use partwire_core::codec::AccessSchemas;
use partwire_core::schema::{FieldDef, ScalarType, Schema, SchemaDef, SchemaRegistry, VariantDef};
use partwire_core::{MessageObject, Result};

fn demo_schemas() -> Result<(Schema, Schema)> {
    let header = Schema::new(SchemaDef::new(
        "demo.header",
        vec![
            FieldDef::scalar("priority", ScalarType::Int),
            FieldDef::choice(
                "reply_to",
                vec![
                    VariantDef::empty("none"),
                    VariantDef::new("queue", vec![FieldDef::scalar("name", ScalarType::String)]),
                ],
            ),
        ],
    ))?;
    let payload = Schema::new(SchemaDef::new(
        "demo.text",
        vec![FieldDef::scalar("text", ScalarType::String)],
    ))?;
    Ok((header, payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "partwire.yaml".into());
    let cfg = if Path::new(&path).exists() {
        config::load_from_file(&path)?
    } else {
        tracing::info!(%path, "config file not found, using defaults");
        config::PartwireConfig::default()
    };

    let sender_reg = SchemaRegistry::shared();
    let receiver_reg = SchemaRegistry::shared();
    let sender = Negotiator::from_config(
        Arc::clone(&sender_reg),
        Arc::new(LoopbackPeer::new(Arc::clone(&receiver_reg))),
        &cfg,
    );
    let receiver = Negotiator::from_config(
        Arc::clone(&receiver_reg),
        Arc::new(LoopbackPeer::new(Arc::clone(&sender_reg))),
        &cfg,
    );

    let (header, payload) = demo_schemas()?;
    let msg = MessageObject::with_payload(&sender_reg, header, payload);
    let h = msg.header();
    h.set(h.schema().accessor("priority")?, 4)?;
    h.set(h.schema().accessor("reply_to.queue.name")?, "replies")?;
    if let Some(p) = msg.payload() {
        p.set(p.schema().accessor("text")?, "hello over partwire")?;
    }

    let slices = sender.encode_for_peer(&msg).await?;
    let decoded = receiver.decode(&slices.to_vec(), &AccessSchemas::default()).await?;
    tracing::info!(
        original_length = decoded.original_length(),
        schemas = receiver_reg.len(),
        "message delivered"
    );
    if let Some(p) = decoded.payload() {
        let text = p.get(p.schema().accessor("text")?)?;
        println!("{text:?}");
    }
    print!("{}", sender.stats().render());
    Ok(())
}
