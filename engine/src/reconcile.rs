//! The reconciler (C8): server-authoritative three-way merge of a
//! client's delta against the authoritative record set (§4.8).
//!
//! The starting point's `Reconciler` picked a winner per `MergeStrategy`
//! (`ClockWins`/`TimestampWins`) between two logical-clock-ordered
//! operations. There is no logical clock here and no automatic winner:
//! a collision on the same `created` id is always surfaced as
//! `conflict` for the caller to resolve explicitly via `resolve`. What
//! carries over is the shape of the result — a pruned, per-type
//! partitioning of what changed — generalized from operation log
//! entries to the delta compiler's `TypeIndex`.

use std::collections::HashSet;

use crate::codec;
use crate::delta::{self, ConflictVersion, IdIndex, RankIndex, TypeIndex};
use crate::error::Result;
use crate::hash::hash_default;
use crate::record::{Record, RecordId, Timestamp, Tombstone};
use crate::store::RecordStore;

/// The result of a `reconcile` or `resolve` pass: the post-merge
/// authoritative hash, and the delta the client still needs to apply.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub hash: String,
    pub data: TypeIndex,
}

fn active_match(store: &RecordStore, type_name: &str, id: RecordId) -> Option<Record> {
    store.active(type_name).iter().find(|r| r.created == id).cloned()
}

fn tombstone_match(store: &RecordStore, type_name: &str, id: RecordId) -> Option<Tombstone> {
    store.tombstones(type_name).iter().find(|t| t.created == id).copied()
}

fn active_count(store: &RecordStore, type_name: &str, id: RecordId) -> usize {
    store.active(type_name).iter().filter(|r| r.created == id).count()
}

/// The authoritative version for `id` as a [`ConflictVersion`], if any
/// exists (active record takes precedence over a same-id tombstone,
/// which §3's no-resurrection invariant guarantees can't both exist).
fn authoritative_version(store: &RecordStore, type_name: &str, id: RecordId) -> Option<ConflictVersion> {
    active_match(store, type_name, id)
        .map(ConflictVersion::Record)
        .or_else(|| tombstone_match(store, type_name, id).map(ConflictVersion::Tombstone))
}

/// Looks up `id` across a client rank's `new`/`modified`/`deleted`
/// partitions (a client delta never carries `conflict`, per C6).
fn client_version(client_rank: &RankIndex, id: RecordId) -> Option<ConflictVersion> {
    client_rank
        .new
        .get(&id)
        .or_else(|| client_rank.modified.get(&id))
        .cloned()
        .map(ConflictVersion::Record)
        .or_else(|| client_rank.deleted.get(&id).copied().map(ConflictVersion::Tombstone))
}

/// Tentatively place each server-screened `(id, record)` into `rank`'s
/// matching partition, unless the client also reports `id` anywhere in
/// its delta for this type — in which case both versions move to
/// `rank.conflict` and the tentative placement is skipped entirely.
fn screen_into(
    rank: &mut RankIndex,
    client_rank: Option<&RankIndex>,
    id: RecordId,
    server_version: ConflictVersion,
    place: impl FnOnce(&mut RankIndex, RecordId, ConflictVersion),
    handled: &mut HashSet<RecordId>,
) {
    handled.insert(id);
    let collision = client_rank.and_then(|c| client_version(c, id));
    match collision {
        Some(client_side) => {
            rank.conflict.insert(id, vec![server_version, client_side]);
        }
        None => place(rank, id, server_version),
    }
}

fn place_new(rank: &mut RankIndex, id: RecordId, version: ConflictVersion) {
    if let ConflictVersion::Record(record) = version {
        rank.new.insert(id, record);
    }
}

fn place_modified(rank: &mut RankIndex, id: RecordId, version: ConflictVersion) {
    if let ConflictVersion::Record(record) = version {
        rank.modified.insert(id, record);
    }
}

fn place_deleted(rank: &mut RankIndex, id: RecordId, version: ConflictVersion) {
    if let ConflictVersion::Tombstone(tombstone) = version {
        rank.deleted.insert(id, tombstone);
    }
}

fn conflict_push(rank: &mut RankIndex, id: RecordId, server_side: Option<ConflictVersion>, client_side: ConflictVersion) {
    let mut versions = Vec::new();
    if let Some(server_side) = server_side {
        versions.push(server_side);
    }
    versions.push(client_side);
    rank.conflict.insert(id, versions);
}

/// Merge `client_delta` (the output of C6 against `last_sync` on the
/// client) into `store`, mutating it in place, and return the post-merge
/// hash plus whatever the client still needs to apply (§4.8).
pub fn reconcile(store: &mut RecordStore, last_sync: Timestamp, client_delta: &TypeIndex) -> Result<ReconcileOutcome> {
    let server_delta = delta::compile(store, last_sync);
    let mut response = TypeIndex::new();

    let type_names: Vec<String> = store.registry().type_order().to_vec();
    for type_name in &type_names {
        let mut rank = RankIndex::default();
        let client_rank = client_delta.get(type_name);
        let mut handled: HashSet<RecordId> = HashSet::new();

        if let Some(server_rank) = server_delta.get(type_name) {
            for (&id, record) in &server_rank.new {
                screen_into(&mut rank, client_rank, id, ConflictVersion::Record(record.clone()), place_new, &mut handled);
            }
            for (&id, record) in &server_rank.modified {
                screen_into(&mut rank, client_rank, id, ConflictVersion::Record(record.clone()), place_modified, &mut handled);
            }
            for (&id, tombstone) in &server_rank.deleted {
                screen_into(&mut rank, client_rank, id, ConflictVersion::Tombstone(*tombstone), place_deleted, &mut handled);
            }
        }

        if let Some(client_rank) = client_rank {
            apply_client_new(store, type_name, &client_rank.new, &handled, &mut rank)?;
            apply_client_modified(store, type_name, &client_rank.modified, last_sync, &handled, &mut rank)?;
            apply_client_deleted(store, type_name, &client_rank.deleted, &handled, &mut rank)?;
        }

        response.insert_if_nonempty(type_name.clone(), rank);
    }

    let hash = hash_default(&codec::serialize(store));
    Ok(ReconcileOutcome { hash, data: response })
}

fn apply_client_new(
    store: &mut RecordStore,
    type_name: &str,
    entries: &IdIndex,
    handled: &HashSet<RecordId>,
    rank: &mut RankIndex,
) -> Result<()> {
    for (&id, record) in entries {
        if handled.contains(&id) {
            continue;
        }
        if active_count(store, type_name, id) > 0 || tombstone_match(store, type_name, id).is_some() {
            let server_side = authoritative_version(store, type_name, id);
            conflict_push(rank, id, server_side, ConflictVersion::Record(record.clone()));
        } else {
            store.add(type_name, record.clone())?;
        }
    }
    Ok(())
}

fn apply_client_modified(
    store: &mut RecordStore,
    type_name: &str,
    entries: &IdIndex,
    last_sync: Timestamp,
    handled: &HashSet<RecordId>,
    rank: &mut RankIndex,
) -> Result<()> {
    for (&id, record) in entries {
        if handled.contains(&id) {
            continue;
        }
        let accepted = match active_match(store, type_name, id) {
            Some(existing) if existing.modified <= last_sync && record.modified > existing.modified => true,
            _ => false,
        };
        if accepted {
            store.replace(type_name, record.clone())?;
        } else {
            let server_side = authoritative_version(store, type_name, id);
            conflict_push(rank, id, server_side, ConflictVersion::Record(record.clone()));
        }
    }
    Ok(())
}

fn apply_client_deleted(
    store: &mut RecordStore,
    type_name: &str,
    entries: &std::collections::BTreeMap<RecordId, Tombstone>,
    handled: &HashSet<RecordId>,
    rank: &mut RankIndex,
) -> Result<()> {
    for (&id, tombstone) in entries {
        if handled.contains(&id) {
            continue;
        }
        if active_count(store, type_name, id) == 1 {
            store.remove(type_name, id, tombstone.deleted, true)?;
        } else {
            let server_side = authoritative_version(store, type_name, id);
            conflict_push(rank, id, server_side, ConflictVersion::Tombstone(*tombstone));
        }
    }
    Ok(())
}

/// Apply a caller-chosen set of conflict resolutions directly: `new`/
/// `modified` entries are upserted, `deleted` entries are tombstoned if
/// still active. No conflict detection runs here — the caller already
/// resolved every collision (§6 `resolve`).
pub fn resolve(store: &mut RecordStore, chosen: &TypeIndex) -> Result<ReconcileOutcome> {
    let type_names: Vec<String> = store.registry().type_order().to_vec();
    for type_name in &type_names {
        let Some(rank) = chosen.get(type_name) else {
            continue;
        };
        for record in rank.new.values().chain(rank.modified.values()) {
            if active_count(store, type_name, record.created) > 0 {
                store.replace(type_name, record.clone())?;
            } else {
                store.add(type_name, record.clone())?;
            }
        }
        for tombstone in rank.deleted.values() {
            if active_count(store, type_name, tombstone.created) > 0 {
                store.remove(type_name, tombstone.created, tombstone.deleted, true)?;
            }
        }
    }
    let hash = hash_default(&codec::serialize(store));
    Ok(ReconcileOutcome { hash, data: TypeIndex::new() })
}
