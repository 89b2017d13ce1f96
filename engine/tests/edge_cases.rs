//! Edge cases for the canonical codec, record store, delta compiler and
//! reconciler against unusual but valid inputs: empty/unicode/long
//! strings, deeply nested JSON, many configured types, and reconciliation
//! at scale.

use serde_json::json;

use carry_engine::codec;
use carry_engine::delta;
use carry_engine::hash::hash_default;
use carry_engine::payload::{JsonPayload, TypeRegistry};
use carry_engine::record::{Record, RecordId};
use carry_engine::reconcile;
use carry_engine::store::RecordStore;

fn registry_with(types: &[&str]) -> TypeRegistry {
    let mut r = TypeRegistry::new();
    for t in types {
        r.register_json(*t);
    }
    r
}

#[test]
fn empty_string_payload_round_trips() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    store
        .add("notes", Record::new(1, Box::new(JsonPayload(json!({"title": ""})))))
        .unwrap();

    let bytes = codec::serialize(&store);
    let value = codec::parse(&bytes).unwrap();
    let mut restored = RecordStore::new(registry_with(&["notes"]));
    restored.load_from_canonical(&value).unwrap();

    assert_eq!(restored.active("notes")[0].payload.to_canonical(), json!({"title": ""}));
}

#[test]
fn unicode_payload_round_trips_byte_identical() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    let text = "héllo wörld 日本語 🎉 \u{0000} \u{FFFD}";
    store
        .add("notes", Record::new(1, Box::new(JsonPayload(json!({"title": text})))))
        .unwrap();

    let first = codec::serialize(&store);
    let value = codec::parse(&first).unwrap();
    let mut restored = RecordStore::new(registry_with(&["notes"]));
    restored.load_from_canonical(&value).unwrap();
    let second = codec::serialize(&restored);

    assert_eq!(first, second);
    assert_eq!(
        restored.active("notes")[0].payload.to_canonical(),
        json!({"title": text})
    );
}

#[test]
fn very_long_string_payload_hashes_consistently() {
    let long = "x".repeat(200_000);
    let mut store = RecordStore::new(registry_with(&["notes"]));
    store
        .add("notes", Record::new(1, Box::new(JsonPayload(json!({"body": long})))))
        .unwrap();

    let first = hash_default(&codec::serialize(&store));
    let second = hash_default(&codec::serialize(&store));
    assert_eq!(first, second);
}

#[test]
fn record_id_near_u64_boundary_round_trips() {
    let id: RecordId = u64::MAX - 1;
    let mut store = RecordStore::new(registry_with(&["notes"]));
    store
        .add("notes", Record::new(id, Box::new(JsonPayload(json!({"n": 1})))))
        .unwrap();

    let value = codec::parse(&codec::serialize(&store)).unwrap();
    let mut restored = RecordStore::new(registry_with(&["notes"]));
    restored.load_from_canonical(&value).unwrap();
    assert_eq!(restored.active("notes")[0].created, id);
}

#[test]
fn deeply_nested_json_payload_round_trips() {
    let mut nested = json!({"leaf": true});
    for i in 0..200 {
        nested = json!({"level": i, "child": nested});
    }

    let mut store = RecordStore::new(registry_with(&["notes"]));
    store
        .add("notes", Record::new(1, Box::new(JsonPayload(nested.clone()))))
        .unwrap();

    let value = codec::parse(&codec::serialize(&store)).unwrap();
    let mut restored = RecordStore::new(registry_with(&["notes"]));
    restored.load_from_canonical(&value).unwrap();
    assert_eq!(restored.active("notes")[0].payload.to_canonical(), nested);
}

#[test]
fn payload_fields_with_special_characters_survive() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    let payload = json!({
        "with.dot": 1,
        "with-dash": 2,
        "with space": 3,
        "with\"quote": 4,
        "": 5,
    });
    store
        .add("notes", Record::new(1, Box::new(JsonPayload(payload.clone()))))
        .unwrap();

    let value = codec::parse(&codec::serialize(&store)).unwrap();
    let mut restored = RecordStore::new(registry_with(&["notes"]));
    restored.load_from_canonical(&value).unwrap();
    assert_eq!(restored.active("notes")[0].payload.to_canonical(), payload);
}

#[test]
fn many_configured_types_serialize_in_configured_order() {
    let type_names: Vec<String> = (0..50).map(|i| format!("type_{i}")).collect();
    let refs: Vec<&str> = type_names.iter().map(String::as_str).collect();
    let mut store = RecordStore::new(registry_with(&refs));

    for (i, name) in type_names.iter().enumerate() {
        store
            .add(name, Record::new((i + 1) as RecordId, Box::new(JsonPayload(json!({})))))
            .unwrap();
    }

    let value = codec::canonical_value(&store);
    let top = value.as_object().unwrap();
    let keys: Vec<&String> = top.keys().collect();
    assert_eq!(keys, type_names.iter().collect::<Vec<_>>());
}

#[test]
fn new_id_strictly_increasing_across_many_rapid_saves() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    let mut ids = Vec::new();
    for _ in 0..1_000 {
        let id = store.new_id(1_000); // clock pinned: every call reads the same millisecond
        ids.push(id);
    }

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn reconcile_at_scale_accounts_for_every_id_exactly_once() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    for id in 1..=500u64 {
        store
            .add("notes", Record::new(id, Box::new(JsonPayload(json!({"n": id})))))
            .unwrap();
    }

    // Half the records were touched by the client since LastSync; the
    // authoritative side never changed.
    let mut client_delta = delta::TypeIndex::new();
    let mut rank = delta::RankIndex::default();
    for id in 1..=250u64 {
        let mut record = Record::new(id, Box::new(JsonPayload(json!({"n": id, "edited": true}))));
        record.modified = 999;
        rank.modified.insert(id, record);
    }
    client_delta.insert_if_nonempty("notes", rank);

    let outcome = reconcile::reconcile(&mut store, 0, &client_delta).unwrap();

    let mut accounted_for = std::collections::HashSet::new();
    if let Some(rank) = outcome.data.get("notes") {
        accounted_for.extend(rank.new.keys());
        accounted_for.extend(rank.modified.keys());
        accounted_for.extend(rank.deleted.keys());
        accounted_for.extend(rank.conflict.keys());
    }
    for id in 1..=250u64 {
        assert!(
            accounted_for.contains(&id) || store.active("notes").iter().any(|r| r.created == id),
            "id {id} missing from both the response and the applied state"
        );
    }
}

#[test]
fn empty_store_serializes_to_empty_object() {
    let store = RecordStore::new(registry_with(&["notes", "tags"]));
    let value = codec::canonical_value(&store);
    assert_eq!(value, json!({}));
}

#[test]
fn tombstone_created_never_collides_with_new_active_record_of_same_id() {
    let mut store = RecordStore::new(registry_with(&["notes"]));
    store
        .add("notes", Record::new(10, Box::new(JsonPayload(json!({}))))).unwrap();
    store.remove("notes", 10, 20, true).unwrap();

    let err = store
        .add("notes", Record::new(10, Box::new(JsonPayload(json!({"resurrected": true})))))
        .unwrap_err();
    assert!(matches!(err, carry_engine::Error::IdConflict(10)));
}
