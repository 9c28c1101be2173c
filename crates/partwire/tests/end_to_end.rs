#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use partwire::comms::config::NegotiatorConfig;
use partwire::core::codec::AccessSchemas;
use partwire::core::schema::{FieldDef, MemorySchemaStore, ScalarType, SchemaDef};
use partwire::{codec, LoopbackPeer, MessageObject, Negotiator, Schema, SchemaRegistry, Value};

#[tokio::test]
async fn send_store_and_restore_through_the_facade() {
    let header = Schema::new(SchemaDef::new(
        "e2e.header",
        vec![FieldDef::scalar("seq", ScalarType::Long)],
    ))
    .unwrap();
    let seq = header.accessor("seq").unwrap();

    let (a_reg, b_reg) = (SchemaRegistry::shared(), SchemaRegistry::shared());
    let a = Negotiator::new(
        Arc::clone(&a_reg),
        Arc::new(LoopbackPeer::new(Arc::clone(&b_reg))),
        NegotiatorConfig::default(),
    );
    let b = Negotiator::new(
        Arc::clone(&b_reg),
        Arc::new(LoopbackPeer::new(Arc::clone(&a_reg))),
        NegotiatorConfig::default(),
    );

    let msg = MessageObject::new(&a_reg, header);
    msg.set(seq, 11i64).unwrap();
    let slices = a.encode_for_peer(&msg).await.unwrap();
    let received = b.decode(&slices.to_vec(), &AccessSchemas::default()).await.unwrap();
    assert_eq!(received.get(seq).unwrap(), Some(Value::Long(11)));

    // The receiver persists it and a third process restores it.
    let store = MemorySchemaStore::new();
    let flat = codec::flatten(&received, "inbox", Some(&store)).unwrap();
    let restored = codec::restore(&SchemaRegistry::shared(), &flat.to_vec(), Some(&store)).unwrap();
    assert_eq!(restored.name, "inbox");
    assert_eq!(restored.message.get(seq).unwrap(), Some(Value::Long(11)));
}
