//! The record store (C5): typed containers of active and tombstoned
//! records, ID assignment, and sort-order-preserving mutation.
//!
//! Replaces the starting point's flat `Collection<Record>` + `pending_ops`
//! log with per-type containers kept sorted descending by `created`,
//! matching SPEC_FULL.md §4.5. ID assignment generalizes the starting
//! point's `LogicalClock`-based `OperationId` ordering into a single
//! monotonic counter seeded from wall-clock time.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::payload::TypeRegistry;
use crate::record::{Record, RecordId, Timestamp, Tombstone};

#[derive(Debug, Default)]
struct TypeContainer {
    active: Vec<Record>,
    tombstones: Vec<Tombstone>,
}

/// Per-type active/tombstone containers plus ID assignment (§3, §4.5).
pub struct RecordStore {
    registry: TypeRegistry,
    containers: HashMap<String, TypeContainer>,
    max_id: RecordId,
}

impl RecordStore {
    pub fn new(registry: TypeRegistry) -> Self {
        let containers = registry
            .type_order()
            .iter()
            .map(|name| (name.clone(), TypeContainer::default()))
            .collect();
        Self {
            registry,
            containers,
            max_id: 0,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Active records for `type_name`, sorted descending by `created`.
    /// Empty (not an error) for an unconfigured or empty type.
    pub fn active(&self, type_name: &str) -> &[Record] {
        self.containers
            .get(type_name)
            .map(|c| c.active.as_slice())
            .unwrap_or(&[])
    }

    /// Tombstones for `type_name`, sorted descending by `created`.
    pub fn tombstones(&self, type_name: &str) -> &[Tombstone] {
        self.containers
            .get(type_name)
            .map(|c| c.tombstones.as_slice())
            .unwrap_or(&[])
    }

    pub fn max_id(&self) -> RecordId {
        self.max_id
    }

    /// Returns `max(now, maxId + 1)`, advancing `maxId` to that value.
    /// Guarantees strictly increasing IDs across rapid batch saves even
    /// when wall-clock resolution can't tell two calls apart.
    pub fn new_id(&mut self, now: Timestamp) -> RecordId {
        let id = now.max(self.max_id + 1);
        self.max_id = id;
        id
    }

    fn require_container(&mut self, type_name: &str) -> Result<&mut TypeContainer> {
        if !self.registry.contains(type_name) {
            return Err(Error::Type(format!("unconfigured type: {type_name}")));
        }
        Ok(self.containers.entry(type_name.to_string()).or_default())
    }

    fn id_taken(container: &TypeContainer, id: RecordId) -> bool {
        container.active.iter().any(|r| r.created == id)
            || container.tombstones.iter().any(|t| t.created == id)
    }

    /// Validates `type_name` is configured and `record.created` collides
    /// with neither an active record nor a tombstone in that type, then
    /// inserts maintaining descending-`created` order. Returns the
    /// record's final index within the active container.
    pub fn add(&mut self, type_name: &str, record: Record) -> Result<usize> {
        let created = record.created;
        let container = self.require_container(type_name)?;
        if Self::id_taken(container, created) {
            return Err(Error::IdConflict(created));
        }
        let index = container
            .active
            .partition_point(|existing| existing.created > created);
        container.active.insert(index, record);
        if created > self.max_id {
            self.max_id = created;
        }
        Ok(index)
    }

    /// Directly inserts a tombstone, bypassing the active-removal flow
    /// `remove` requires. Used by a persistence layer reconstructing a
    /// store's full on-disk state (active records *and* tombstones)
    /// rather than replaying deletions against live records. Fails with
    /// `IdConflictError` if `created` is already taken by either
    /// container, preserving the no-resurrection invariant (§3).
    pub fn load_tombstone(&mut self, type_name: &str, tombstone: Tombstone) -> Result<()> {
        let created = tombstone.created;
        let container = self.require_container(type_name)?;
        if Self::id_taken(container, created) {
            return Err(Error::IdConflict(created));
        }
        let index = container
            .tombstones
            .partition_point(|existing| existing.created > created);
        container.tombstones.insert(index, tombstone);
        if created > self.max_id {
            self.max_id = created;
        }
        Ok(())
    }

    /// Replaces the active record matching `record.created` in place,
    /// preserving sort order (an update never changes its own position
    /// relative to siblings since `created` is immutable). Fails with
    /// `NoMatch` if absent.
    pub fn replace(&mut self, type_name: &str, record: Record) -> Result<()> {
        let created = record.created;
        let container = self.require_container(type_name)?;
        let slot = container
            .active
            .iter_mut()
            .find(|existing| existing.created == created)
            .ok_or(Error::NoMatch(created))?;
        *slot = record;
        Ok(())
    }

    /// Removes the active record with `id` from `type_name`. If
    /// `tombstone`, appends `{created: id, deleted: now}` to the
    /// tombstone container, maintaining descending order. Fails with
    /// `NoMatch` if no active record with `id` exists.
    pub fn remove(&mut self, type_name: &str, id: RecordId, now: Timestamp, tombstone: bool) -> Result<()> {
        let container = self.require_container(type_name)?;
        let position = container
            .active
            .iter()
            .position(|r| r.created == id)
            .ok_or(Error::NoMatch(id))?;
        container.active.remove(position);
        if tombstone {
            let entry = Tombstone {
                created: id,
                deleted: now,
            };
            let index = container
                .tombstones
                .partition_point(|existing| existing.created > id);
            container.tombstones.insert(index, entry);
            if id > self.max_id {
                self.max_id = id;
            }
        }
        Ok(())
    }

    /// Bulk-loads records from a canonical record set (the shape
    /// `codec::canonical_value` produces), instantiating each type's
    /// payload through the registry and invoking `add`. Raises `maxId`
    /// to the observed maximum along the way.
    pub fn load_from_canonical(&mut self, value: &Value) -> Result<()> {
        let top = value
            .as_object()
            .ok_or_else(|| Error::Codec("canonical record set must be an object".into()))?;
        for (type_name, array) in top {
            if !self.registry.contains(type_name) {
                return Err(Error::Type(format!("unconfigured type: {type_name}")));
            }
            let entries = array
                .as_array()
                .ok_or_else(|| Error::Codec(format!("{type_name}: expected an array")))?;
            for entry in entries {
                let record = Record::from_canonical(&self.registry, type_name, entry)?;
                self.add(type_name, record)?;
            }
        }
        Ok(())
    }
}
