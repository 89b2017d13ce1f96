//! The delta compiler (C6) and the `TypeIndex`/`RankIndex` shapes used
//! to exchange deltas over the wire (§3, §6).
//!
//! No direct 1:1 analog exists in the starting point (its `store.rs`
//! tracked a flat `pending_ops` log rather than deriving deltas from
//! record timestamps); the pruned, per-type/per-rank partitioning style
//! follows the starting point's `reconcile.rs::ReconcileResult` grouping
//! convention.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::payload::TypeRegistry;
use crate::record::{Record, RecordId, Timestamp, Tombstone};
use crate::store::RecordStore;

/// One side of a detected conflict: either an active record or a
/// tombstone, since either side's delta can be any rank.
#[derive(Debug, Clone)]
pub enum ConflictVersion {
    Record(Record),
    Tombstone(Tombstone),
}

impl ConflictVersion {
    fn to_canonical(&self) -> Value {
        match self {
            ConflictVersion::Record(r) => r.to_canonical(),
            ConflictVersion::Tombstone(t) => t.to_canonical(),
        }
    }

    fn from_canonical(registry: &TypeRegistry, type_name: &str, value: &Value) -> Result<Self> {
        if value.get("_deleted").is_some() {
            Ok(ConflictVersion::Tombstone(Tombstone::from_canonical(value)?))
        } else {
            Ok(ConflictVersion::Record(Record::from_canonical(
                registry, type_name, value,
            )?))
        }
    }

    pub fn created(&self) -> RecordId {
        match self {
            ConflictVersion::Record(r) => r.created,
            ConflictVersion::Tombstone(t) => t.created,
        }
    }
}

/// An ordered map from `RecordId` to active record.
pub type IdIndex = BTreeMap<RecordId, Record>;

/// The per-type partition of one sync delta: up to four ranks, each
/// pruned when empty (§3).
#[derive(Debug, Clone, Default)]
pub struct RankIndex {
    pub new: IdIndex,
    pub modified: IdIndex,
    pub deleted: BTreeMap<RecordId, Tombstone>,
    pub conflict: BTreeMap<RecordId, Vec<ConflictVersion>>,
}

impl RankIndex {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.conflict.is_empty()
    }

    fn to_canonical(&self) -> Value {
        let mut map = Map::new();
        if !self.new.is_empty() {
            map.insert("new".into(), id_index_to_json(&self.new));
        }
        if !self.modified.is_empty() {
            map.insert("modified".into(), id_index_to_json(&self.modified));
        }
        if !self.deleted.is_empty() {
            let mut inner = Map::new();
            for (id, tombstone) in &self.deleted {
                inner.insert(id.to_string(), tombstone.to_canonical());
            }
            map.insert("deleted".into(), Value::Object(inner));
        }
        if !self.conflict.is_empty() {
            let mut inner = Map::new();
            for (id, versions) in &self.conflict {
                let arr = versions.iter().map(ConflictVersion::to_canonical).collect();
                inner.insert(id.to_string(), Value::Array(arr));
            }
            map.insert("conflict".into(), Value::Object(inner));
        }
        Value::Object(map)
    }

    fn from_canonical(registry: &TypeRegistry, type_name: &str, value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Reconcile(format!("{type_name}: rank index must be an object")))?;
        let mut rank = RankIndex::default();
        for (rank_name, entries) in obj {
            let entries = entries.as_object().ok_or_else(|| {
                Error::Reconcile(format!("{type_name}.{rank_name}: expected an object"))
            })?;
            match rank_name.as_str() {
                "new" => rank.new = id_index_from_json(registry, type_name, entries)?,
                "modified" => rank.modified = id_index_from_json(registry, type_name, entries)?,
                "deleted" => {
                    for (id, v) in entries {
                        let id: RecordId = id.parse().map_err(|_| {
                            Error::Reconcile(format!("{type_name}.deleted: bad id {id}"))
                        })?;
                        rank.deleted.insert(id, Tombstone::from_canonical(v)?);
                    }
                }
                "conflict" => {
                    for (id, v) in entries {
                        let id: RecordId = id.parse().map_err(|_| {
                            Error::Reconcile(format!("{type_name}.conflict: bad id {id}"))
                        })?;
                        let arr = v.as_array().ok_or_else(|| {
                            Error::Reconcile(format!("{type_name}.conflict[{id}]: expected array"))
                        })?;
                        let versions = arr
                            .iter()
                            .map(|entry| ConflictVersion::from_canonical(registry, type_name, entry))
                            .collect::<Result<Vec<_>>>()?;
                        rank.conflict.insert(id, versions);
                    }
                }
                other => {
                    return Err(Error::Reconcile(format!("{type_name}: unknown rank {other}")))
                }
            }
        }
        Ok(rank)
    }
}

fn id_index_to_json(index: &IdIndex) -> Value {
    let mut inner = Map::new();
    for (id, record) in index {
        inner.insert(id.to_string(), record.to_canonical());
    }
    Value::Object(inner)
}

fn id_index_from_json(
    registry: &TypeRegistry,
    type_name: &str,
    entries: &Map<String, Value>,
) -> Result<IdIndex> {
    let mut index = IdIndex::new();
    for (id, value) in entries {
        let id: RecordId = id
            .parse()
            .map_err(|_| Error::Reconcile(format!("{type_name}: bad record id {id}")))?;
        index.insert(id, Record::from_canonical(registry, type_name, value)?);
    }
    Ok(index)
}

/// A mapping from type-name to `RankIndex`, with empty types pruned
/// (§3). This is the shape exchanged for deltas (C6's output) and
/// reconciliation responses (C8's output).
#[derive(Debug, Clone, Default)]
pub struct TypeIndex(BTreeMap<String, RankIndex>);

impl TypeIndex {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, type_name: &str) -> Option<&RankIndex> {
        self.0.get(type_name)
    }

    pub fn entry(&mut self, type_name: &str) -> &mut RankIndex {
        self.0.entry(type_name.to_string()).or_default()
    }

    /// Insert `rank` under `type_name` unless it is entirely empty,
    /// preserving the "empty partitions are pruned" invariant.
    pub fn insert_if_nonempty(&mut self, type_name: impl Into<String>, rank: RankIndex) {
        if !rank.is_empty() {
            self.0.insert(type_name.into(), rank);
        }
    }

    pub fn types(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RankIndex)> {
        self.0.iter()
    }

    /// Drop any type entries that have gone empty (e.g. after removing
    /// a rank that turned out to be the type's only content).
    pub fn prune(&mut self) {
        self.0.retain(|_, rank| !rank.is_empty());
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (type_name, rank) in &self.0 {
            map.insert(type_name.clone(), rank.to_canonical());
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value, registry: &TypeRegistry) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Reconcile("TypeIndex must be an object".into()))?;
        let mut index = TypeIndex::new();
        for (type_name, rank_value) in obj {
            if !registry.contains(type_name) {
                return Err(Error::Type(format!("unconfigured type: {type_name}")));
            }
            let rank = RankIndex::from_canonical(registry, type_name, rank_value)?;
            index.insert_if_nonempty(type_name.clone(), rank);
        }
        Ok(index)
    }
}

/// Classify `store`'s records relative to `since` into a `TypeIndex`
/// (§4.6). A record newer than `since` by `created` is `new`; one
/// created at or before `since` but touched after is `modified`; a
/// tombstone deleted after `since` is `deleted`. `conflict` is never
/// produced here — only the reconciler introduces it.
pub fn compile(store: &RecordStore, since: Timestamp) -> TypeIndex {
    let mut index = TypeIndex::new();
    for type_name in store.registry().type_order() {
        let mut rank = RankIndex::default();
        for record in store.active(type_name) {
            if record.created > since {
                rank.new.insert(record.created, record.clone());
            } else if record.modified > since {
                rank.modified.insert(record.created, record.clone());
            }
        }
        for tombstone in store.tombstones(type_name) {
            if tombstone.deleted > since {
                rank.deleted.insert(tombstone.created, *tombstone);
            }
        }
        index.insert_if_nonempty(type_name.clone(), rank);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JsonPayload;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.register_json("notes");
        r
    }

    fn store_with(records: Vec<(RecordId, Timestamp, Value)>) -> RecordStore {
        let mut store = RecordStore::new(registry());
        for (created, modified, payload) in records {
            let mut record = Record::new(created, Box::new(JsonPayload(payload)));
            record.modified = modified;
            store.add("notes", record).unwrap();
        }
        store
    }

    #[test]
    fn new_records_are_created_after_since() {
        let store = store_with(vec![(100, 0, json!({})), (50, 0, json!({}))]);
        let index = compile(&store, 60);
        let rank = index.get("notes").unwrap();
        assert!(rank.new.contains_key(&100));
        assert!(!rank.new.contains_key(&50));
        assert!(rank.modified.is_empty());
    }

    #[test]
    fn modified_records_are_created_before_but_touched_after_since() {
        let store = store_with(vec![(50, 200, json!({}))]);
        let index = compile(&store, 100);
        let rank = index.get("notes").unwrap();
        assert!(rank.new.is_empty());
        assert!(rank.modified.contains_key(&50));
    }

    #[test]
    fn new_record_is_never_also_modified() {
        // created > since takes priority even if modified is also set.
        let mut store = RecordStore::new(registry());
        let mut record = Record::new(150, Box::new(JsonPayload(json!({}))));
        record.modified = 200;
        store.add("notes", record).unwrap();

        let index = compile(&store, 100);
        let rank = index.get("notes").unwrap();
        assert!(rank.new.contains_key(&150));
        assert!(!rank.modified.contains_key(&150));
    }

    #[test]
    fn tombstones_deleted_after_since_are_classified_deleted() {
        let mut store = store_with(vec![(50, 0, json!({}))]);
        let record = store.active("notes")[0].clone();
        store.remove("notes", record.created, 999, true).unwrap();

        let index = compile(&store, 10);
        let rank = index.get("notes").unwrap();
        assert!(rank.deleted.contains_key(&50));
    }

    #[test]
    fn empty_partitions_are_pruned() {
        let store = store_with(vec![(50, 0, json!({}))]);
        let index = compile(&store, 1000); // nothing newer than since
        assert!(index.is_empty());
    }

    #[test]
    fn compiler_never_produces_conflict_rank() {
        let store = store_with(vec![(100, 0, json!({}))]);
        let index = compile(&store, 0);
        let rank = index.get("notes").unwrap();
        assert!(rank.conflict.is_empty());
    }

    #[test]
    fn type_index_round_trips_through_json() {
        let store = store_with(vec![(100, 0, json!({"title": "hi"}))]);
        let index = compile(&store, 0);
        let json = index.to_json();
        let restored = TypeIndex::from_json(&json, &registry()).unwrap();
        assert_eq!(restored.get("notes").unwrap().new.len(), 1);
    }
}
