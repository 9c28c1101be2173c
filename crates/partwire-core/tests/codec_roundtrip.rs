//! Codec behaviour across single-buffer, wire and flattened forms.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use partwire_core::codec::{self, AccessSchemas};
use partwire_core::part::MAX_NESTING_DEPTH;
use partwire_core::protocol::frame::{Prologue, ENCODING_VERSION, PROLOGUE_LEN};
use partwire_core::schema::{FieldDef, MemorySchemaStore, ScalarType, SchemaDef, VariantDef};
use partwire_core::{Accessor, MessageObject, PartRole, Schema, SchemaId, SchemaRegistry, Value};

fn header_def(name: &str) -> SchemaDef {
    SchemaDef::new(
        name,
        vec![
            FieldDef::scalar("priority", ScalarType::Int),
            FieldDef::scalar("durable", ScalarType::Bool),
            FieldDef::choice(
                "reply",
                vec![
                    VariantDef::empty("none"),
                    VariantDef::new("queue", vec![FieldDef::scalar("name", ScalarType::String)]),
                    VariantDef::new("topic", vec![FieldDef::list("segments", ScalarType::String)]),
                ],
            ),
        ],
    )
}

fn payload_def() -> SchemaDef {
    SchemaDef::new(
        "body",
        vec![
            FieldDef::scalar("ts", ScalarType::Long),
            FieldDef::scalar("score", ScalarType::Double),
            FieldDef::scalar("data", ScalarType::Bytes),
            FieldDef::part("props"),
        ],
    )
}

fn props_def() -> SchemaDef {
    SchemaDef::new("props", vec![FieldDef::list("keys", ScalarType::String)])
}

struct Fixture {
    reg: Arc<SchemaRegistry>,
    header: Arc<Schema>,
    payload: Arc<Schema>,
    props: Arc<Schema>,
}

fn fixture() -> Fixture {
    let reg = SchemaRegistry::shared();
    let header = reg.register(Schema::new(header_def("hdr")).unwrap());
    let payload = reg.register(Schema::new(payload_def()).unwrap());
    let props = reg.register(Schema::new(props_def()).unwrap());
    Fixture {
        reg,
        header,
        payload,
        props,
    }
}

fn full_message(fx: &Fixture) -> MessageObject {
    let msg = MessageObject::with_payload(&fx.reg, Arc::clone(&fx.header), Arc::clone(&fx.payload));
    let h = msg.header();
    h.set(fx.header.accessor("priority").unwrap(), 7).unwrap();
    h.set(fx.header.accessor("durable").unwrap(), true).unwrap();
    h.set(fx.header.accessor("reply.queue.name").unwrap(), "replies").unwrap();

    let p = msg.payload().unwrap();
    p.set(fx.payload.accessor("ts").unwrap(), 1_700_000_000_000i64).unwrap();
    p.set(fx.payload.accessor("score").unwrap(), 0.25f64).unwrap();
    p.set(fx.payload.accessor("data").unwrap(), vec![1u8, 2, 3]).unwrap();
    let props = p
        .new_sub_part(fx.payload.accessor("props").unwrap(), Arc::clone(&fx.props))
        .unwrap();
    props
        .set(
            fx.props.accessor("keys").unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        )
        .unwrap();
    msg
}

fn assert_full(fx: &Fixture, msg: &MessageObject) {
    let h = msg.header();
    assert_eq!(h.get(fx.header.accessor("priority").unwrap()).unwrap(), Some(Value::Int(7)));
    assert_eq!(h.get(fx.header.accessor("durable").unwrap()).unwrap(), Some(Value::Bool(true)));
    assert_eq!(
        h.get(fx.header.accessor("reply.queue.name").unwrap()).unwrap(),
        Some(Value::from("replies"))
    );
    assert_eq!(h.get(fx.header.accessor("reply.topic.segments").unwrap()).unwrap(), None);

    let p = msg.payload().unwrap();
    assert_eq!(p.get(fx.payload.accessor("ts").unwrap()).unwrap(), Some(Value::Long(1_700_000_000_000)));
    assert_eq!(p.get(fx.payload.accessor("score").unwrap()).unwrap(), Some(Value::Double(0.25)));
    assert_eq!(
        p.get(fx.payload.accessor("data").unwrap()).unwrap(),
        Some(Value::Bytes(Bytes::from_static(&[1, 2, 3])))
    );
    let props = p
        .get_sub_part(fx.payload.accessor("props").unwrap(), &fx.props)
        .unwrap()
        .unwrap();
    assert_eq!(
        props.get(fx.props.accessor("keys").unwrap()).unwrap(),
        Some(Value::List(vec![Value::from("a"), Value::from("b")]))
    );
}

#[test]
fn single_buffer_round_trip() {
    let fx = fixture();
    let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
    msg.header().set(fx.header.accessor("priority").unwrap(), -3).unwrap();

    let bytes = codec::encode_single(&msg).unwrap();
    let back = codec::decode_single(&fx.reg, bytes.clone(), &AccessSchemas::default()).unwrap();
    assert!(!back.has_payload());
    assert_eq!(back.original_length(), bytes.len());
    assert_eq!(
        back.header().get(fx.header.accessor("priority").unwrap()).unwrap(),
        Some(Value::Int(-3))
    );
    assert_eq!(back.header().get(fx.header.accessor("durable").unwrap()).unwrap(), Some(Value::Null));
}

#[test]
fn wire_round_trip_and_concatenated_form() {
    let fx = fixture();
    let msg = full_message(&fx);
    let slices = codec::encode_wire(&msg).unwrap();
    assert_eq!(slices.slice_count(), 3);
    assert_eq!(slices.first.len(), PROLOGUE_LEN);

    let back = codec::decode_slices(&fx.reg, &slices.to_vec(), &AccessSchemas::default()).unwrap();
    assert_full(&fx, &back);
    assert_eq!(back.original_length(), slices.total_bytes());

    let joined = codec::decode_single(&fx.reg, slices.concat(), &AccessSchemas::default()).unwrap();
    assert_full(&fx, &joined);
}

#[test]
fn untouched_message_is_passed_through_without_copying() {
    let fx = fixture();
    let slices = codec::encode_wire(&full_message(&fx)).unwrap();
    let back = codec::decode_slices(&fx.reg, &slices.to_vec(), &AccessSchemas::default()).unwrap();

    // Reading does not dirty anything.
    assert_full(&fx, &back);
    let again = codec::encode_wire(&back).unwrap();
    assert_eq!(again, slices);
    assert_eq!(again.header.as_ptr(), slices.header.as_ptr());
    assert_eq!(
        again.payload.as_ref().unwrap().as_ptr(),
        slices.payload.as_ref().unwrap().as_ptr()
    );
}

#[test]
fn copy_is_independent_of_the_original() {
    let fx = fixture();
    let slices = codec::encode_wire(&full_message(&fx)).unwrap();
    let original = codec::decode_slices(&fx.reg, &slices.to_vec(), &AccessSchemas::default()).unwrap();
    let copy = original.get_copy().unwrap();
    assert_eq!(copy.original_length(), 0);

    let prio = fx.header.accessor("priority").unwrap();
    copy.header().set(prio, 99).unwrap();
    let props = copy
        .payload()
        .unwrap()
        .get_sub_part(fx.payload.accessor("props").unwrap(), &fx.props)
        .unwrap()
        .unwrap();
    props.set(fx.props.accessor("keys").unwrap(), Value::Null).unwrap();

    assert_eq!(original.header().get(prio).unwrap(), Some(Value::Int(7)));
    assert_eq!(codec::encode_wire(&original).unwrap(), slices);
    assert_ne!(codec::encode_wire(&copy).unwrap(), slices);
}

#[test]
fn switching_a_choice_survives_the_wire() {
    let fx = fixture();
    let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
    let h = msg.header();
    h.set(fx.header.accessor("reply.queue.name").unwrap(), "q").unwrap();
    h.set(
        fx.header.accessor("reply.topic.segments").unwrap(),
        Value::List(vec![Value::from("a")]),
    )
    .unwrap();

    let back = codec::decode_single(&fx.reg, codec::encode_single(&msg).unwrap(), &AccessSchemas::default()).unwrap();
    let reply = fx.header.accessor("reply").unwrap();
    assert_eq!(back.header().get_choice(reply).unwrap().unwrap().name, "topic");
    assert_eq!(back.header().get(fx.header.accessor("reply.queue.name").unwrap()).unwrap(), None);
}

/// Field set for each `reply` variant, with the value written to it.
fn reply_field(fx: &Fixture, variant: u32) -> Option<(Accessor, Value)> {
    match variant {
        1 => Some((fx.header.accessor("reply.queue.name").unwrap(), Value::from("q"))),
        2 => Some((
            fx.header.accessor("reply.topic.segments").unwrap(),
            Value::List(vec![Value::from("a")]),
        )),
        _ => None,
    }
}

#[test]
fn every_choice_switch_clears_the_previous_variant() {
    let fx = fixture();
    let reply = fx.header.accessor("reply").unwrap();

    for from in 0..3u32 {
        for to in (0..3u32).filter(|to| *to != from) {
            let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
            let h = msg.header();
            h.set_choice(reply, from).unwrap();
            if let Some((acc, v)) = reply_field(&fx, from) {
                h.set(acc, v).unwrap();
            }
            h.set_choice(reply, to).unwrap();

            let bytes = codec::encode_single(&msg).unwrap();
            let back = codec::decode_single(&fx.reg, bytes, &AccessSchemas::default()).unwrap();
            let h = back.header();
            assert_eq!(h.get_choice(reply).unwrap().unwrap().index, to, "{from} -> {to}");
            if let Some((acc, _)) = reply_field(&fx, from) {
                assert_eq!(h.get(acc).unwrap(), None, "{from} -> {to}");
            }
            if let Some((acc, _)) = reply_field(&fx, to) {
                assert_eq!(h.get(acc).unwrap(), Some(Value::Null), "{from} -> {to}");
            }
        }
    }
}

#[test]
fn deferred_write_back_is_atomic_with_encode_and_copy() {
    let reg = SchemaRegistry::shared();
    let schema = reg.register(
        Schema::new(SchemaDef::new(
            "counter",
            vec![
                FieldDef::scalar("a", ScalarType::Int),
                FieldDef::scalar("b", ScalarType::Int),
            ],
        ))
        .unwrap(),
    );
    let a = schema.accessor("a").unwrap();
    let b = schema.accessor("b").unwrap();
    let msg = MessageObject::new(&reg, Arc::clone(&schema));
    const ROUNDS: i32 = 2_000;

    let read = |v: Option<Value>| match v {
        Some(Value::Int(i)) => i,
        Some(Value::Null) => -1,
        other => panic!("unexpected value {other:?}"),
    };
    // `a` is staged before `b`, so a snapshot may show `a` one ahead, never behind.
    let check = |part: &partwire_core::MessagePart, last: &mut i32| {
        let (va, vb) = (read(part.get(a).unwrap()), read(part.get(b).unwrap()));
        assert!(va == vb || va == vb + 1, "a={va} b={vb}");
        assert!(va >= *last, "a went back from {last} to {va}");
        *last = va;
    };

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..ROUNDS {
                msg.defer_set(PartRole::Header, a, i).unwrap();
                msg.defer_set(PartRole::Header, b, i).unwrap();
            }
        });
        s.spawn(|| {
            let mut last = -1;
            for _ in 0..300 {
                let slices = codec::encode_wire(&msg).unwrap();
                let back = codec::decode_slices(&reg, &slices.to_vec(), &AccessSchemas::default()).unwrap();
                check(back.header(), &mut last);
                let copy = msg.get_copy().unwrap();
                check(copy.header(), &mut last);
            }
        });
    });

    let back = codec::decode_single(&reg, codec::encode_single(&msg).unwrap(), &AccessSchemas::default()).unwrap();
    assert_eq!(back.header().get(a).unwrap(), Some(Value::Int(ROUNDS - 1)));
    assert_eq!(back.header().get(b).unwrap(), Some(Value::Int(ROUNDS - 1)));
}

/// `node` body holding `levels` nested nodes, innermost one empty.
fn nested_chain(id: SchemaId, levels: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 13 * levels);
    for level in (1..=levels).rev() {
        buf.put_u8(1);
        buf.put_u64(id);
        buf.put_u32((1 + 13 * (level - 1)) as u32);
    }
    buf.put_u8(0);
    buf.freeze()
}

fn header_slices(id: SchemaId, body: Bytes) -> Vec<Bytes> {
    let mut pro = BytesMut::new();
    Prologue {
        header_version: ENCODING_VERSION,
        header_schema: id,
        payload_version: 0,
        payload_schema: 0,
        header_len: body.len() as u32,
    }
    .put(&mut pro);
    vec![pro.freeze(), body]
}

#[test]
fn deeply_nested_body_fails_to_decode() {
    let reg = SchemaRegistry::shared();
    let node = reg.register(Schema::new(SchemaDef::new("node", vec![FieldDef::part("next")])).unwrap());
    let id = node.id();

    let ok = header_slices(id, nested_chain(id, MAX_NESTING_DEPTH));
    assert!(codec::missing_schemas(&reg, &ok).unwrap().is_empty());
    let msg = codec::decode_slices(&reg, &ok, &AccessSchemas::default()).unwrap();
    let next = node.accessor("next").unwrap();
    assert!(msg.header().get_sub_part(next, &node).unwrap().is_some());

    let deep = header_slices(id, nested_chain(id, 200_000));
    let err = codec::decode_slices(&reg, &deep, &AccessSchemas::default()).unwrap_err();
    assert_eq!(err.code().as_str(), "DECODE_FAILED");
    assert_eq!(err.schema_id(), Some(id));
    assert!(codec::missing_schemas(&reg, &deep).is_err());
}

#[test]
fn flatten_lists_every_schema_and_restores_from_the_store() {
    let fx = fixture();
    let msg = full_message(&fx);
    let store = MemorySchemaStore::new();
    let slices = codec::flatten(&msg, "orders", Some(&store)).unwrap();
    assert_eq!(store.len(), 3);

    let fresh = SchemaRegistry::shared();
    let restored = codec::restore(&fresh, &slices.to_vec(), Some(&store)).unwrap();
    assert_eq!(restored.name, "orders");
    assert_eq!(
        restored.schema_ids,
        vec![fx.header.id(), fx.payload.id(), fx.props.id()]
    );
    assert_eq!(fresh.len(), 3);
    assert_full(&fx, &restored.message);
}

#[test]
fn restore_without_store_fails_on_unknown_schema() {
    let fx = fixture();
    let slices = codec::flatten(&full_message(&fx), "orders", None).unwrap();
    let err = codec::restore(&SchemaRegistry::shared(), &slices.to_vec(), None).unwrap_err();
    assert_eq!(err.code().as_str(), "DECODE_FAILED");
    assert_eq!(err.schema_id(), Some(fx.header.id()));
}

#[test]
fn header_only_framing_rules() {
    let fx = fixture();
    let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
    let slices = codec::encode_wire(&msg).unwrap();
    assert_eq!(slices.slice_count(), 2);

    let bytes = codec::encode_single(&msg).unwrap();
    let err = codec::decode_single(
        &fx.reg,
        bytes,
        &AccessSchemas::both(Arc::clone(&fx.header), Arc::clone(&fx.payload)),
    )
    .unwrap_err();
    assert_eq!(err.code().as_str(), "DECODE_FAILED");

    let err = codec::encode_single(&full_message(&fx)).unwrap_err();
    assert_eq!(err.code().as_str(), "ENCODE_FAILED");
}

#[test]
fn compatible_access_schema_reads_renamed_fields() {
    let fx = fixture();
    let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
    msg.header().set(fx.header.accessor("priority").unwrap(), 5).unwrap();
    let bytes = codec::encode_single(&msg).unwrap();

    let mut renamed = header_def("hdr-v2");
    renamed.fields[0].name = "prio".into();
    let renamed = Arc::new(Schema::new(renamed).unwrap());

    let back = codec::decode_single(&fx.reg, bytes, &AccessSchemas::header(Arc::clone(&renamed))).unwrap();
    assert_eq!(back.header().get(renamed.accessor("prio").unwrap()).unwrap(), Some(Value::Int(5)));
}

#[test]
fn missing_schemas_are_found_in_rounds() {
    let fx = fixture();
    let slices = codec::encode_wire(&full_message(&fx)).unwrap().to_vec();

    let remote = SchemaRegistry::shared();
    assert_eq!(
        codec::missing_schemas(&remote, &slices).unwrap(),
        vec![fx.header.id(), fx.payload.id()]
    );
    remote.register(Arc::clone(&fx.header));
    remote.register(Arc::clone(&fx.payload));
    assert_eq!(codec::missing_schemas(&remote, &slices).unwrap(), vec![fx.props.id()]);

    let err = codec::decode_slices(&remote, &slices, &AccessSchemas::default()).unwrap_err();
    assert_eq!(err.schema_id(), Some(fx.props.id()));

    remote.register(Arc::clone(&fx.props));
    assert!(codec::missing_schemas(&remote, &slices).unwrap().is_empty());
    assert_full(&fx, &codec::decode_slices(&remote, &slices, &AccessSchemas::default()).unwrap());
}

#[test]
fn unsupported_version_and_bad_slices_are_rejected() {
    let fx = fixture();
    let msg = MessageObject::new(&fx.reg, Arc::clone(&fx.header));
    let bytes = codec::encode_single(&msg).unwrap();

    let mut tampered = BytesMut::from(&bytes[..]);
    tampered[1] = 9;
    let err = codec::decode_single(&fx.reg, tampered.freeze(), &AccessSchemas::default()).unwrap_err();
    assert_eq!(err.code().as_str(), "DECODE_FAILED");
    assert_eq!(err.schema_id(), Some(fx.header.id()));

    let slices = codec::encode_wire(&msg).unwrap();
    let short_header = slices.header.slice(1..);
    let err = codec::decode_slices(&fx.reg, &[slices.first.clone(), short_header], &AccessSchemas::default())
        .unwrap_err();
    assert_eq!(err.code().as_str(), "DECODE_FAILED");
    assert!(codec::decode_slices(&fx.reg, &[], &AccessSchemas::default()).is_err());
}
