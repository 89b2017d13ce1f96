//! The canonical codec (C1): deterministic serialization of the typed
//! record set to the bytes the hasher (C2) consumes and the local cache
//! (C4) stores as plaintext.
//!
//! A `BTreeMap` would only ever give lexical key order. Canonical order
//! here is "configured type order," so the top-level mapping is built
//! by inserting into a `serde_json::Map` in that exact order; `Map`
//! preserves insertion order on iteration and serialization, which is
//! all the determinism this needs.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::payload::TypeRegistry;
use crate::record::{Record, Tombstone};
use crate::store::RecordStore;

/// Serialize an in-memory model to canonical UTF-8 JSON bytes: a
/// top-level object whose keys are type names in configured order,
/// each holding an array of record objects in descending `created`
/// order (§4.1).
pub fn serialize(store: &RecordStore) -> Vec<u8> {
    canonical_value(store).to_string().into_bytes()
}

/// Build the canonical `serde_json::Value` tree without serializing it
/// to bytes — useful when the caller wants to embed it (e.g. the crypto
/// box's `{salt, iv, text}` container, or the reconciler's `TypeIndex`).
pub fn canonical_value(store: &RecordStore) -> Value {
    let mut top = Map::new();
    for type_name in store.registry().type_order() {
        let records = store.active(type_name);
        if records.is_empty() {
            continue;
        }
        let array: Vec<Value> = records.iter().map(|r| r.to_canonical()).collect();
        top.insert(type_name.clone(), Value::Array(array));
    }
    Value::Object(top)
}

/// Parse canonical bytes back into `(type_name, record)` pairs plus
/// tombstones are not representable in this form (an active-record-only
/// snapshot, matching §4.1's description of the hash pre-image); use
/// [`load_into`] to rebuild a full [`RecordStore`] including tombstones
/// from a cache read that also tracks them separately, or call this
/// directly against the plain canonical form read from `K-data`.
pub fn parse(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
}

/// Bulk-load a `RecordStore` from a previously-serialized canonical
/// value, instantiating each type's payload from its canonical form via
/// `registry` and calling `add` for each (§4.5 `loadFromCanonical`).
pub fn load_into(store: &mut RecordStore, value: &Value) -> Result<()> {
    let top = value
        .as_object()
        .ok_or_else(|| Error::Codec("canonical record set must be an object".into()))?;

    for (type_name, array) in top {
        if !store.registry().contains(type_name) {
            return Err(Error::Type(format!("unconfigured type: {type_name}")));
        }
        let entries = array
            .as_array()
            .ok_or_else(|| Error::Codec(format!("{type_name}: expected an array")))?;
        for entry in entries {
            let record = Record::from_canonical(store.registry(), type_name, entry)?;
            store.add(type_name, record)?;
        }
    }
    Ok(())
}

/// Canonical form of a single tombstone, for embedding in a `TypeIndex`
/// (§6 "Tombstones serialize as `{_created, _deleted}`").
pub fn tombstone_canonical(tombstone: &Tombstone) -> Value {
    tombstone.to_canonical()
}

/// Parse a tombstone back out of its canonical form.
pub fn tombstone_from_canonical(value: &Value) -> Result<Tombstone> {
    Tombstone::from_canonical(value)
}

/// Parse a single record's canonical form for `type_name`, using
/// `registry` to find the payload parser.
pub fn record_from_canonical(
    registry: &TypeRegistry,
    type_name: &str,
    value: &Value,
) -> Result<Record> {
    Record::from_canonical(registry, type_name, value)
}
