//! The record and tombstone types records and deletions are represented
//! as (§3).
//!
//! `RecordId` doubles as the creation timestamp: the store never mints a
//! separate identifier, so uniqueness of `created` within a type *is*
//! identity uniqueness (enforced by [`crate::store::RecordStore`], not
//! here).

use serde_json::Value;

use crate::error::{Error, Result};
use crate::payload::{RecordPayload, TypeRegistry};

/// Milliseconds since epoch. `0` is reserved to mean "absent".
pub type Timestamp = u64;

/// A record's creation timestamp, doubling as its unique identifier.
pub type RecordId = Timestamp;

/// A live record: intrinsic `created`/`modified` plus an application
/// payload behind the [`RecordPayload`] capability set.
#[derive(Debug)]
pub struct Record {
    pub created: RecordId,
    pub modified: Timestamp,
    pub payload: Box<dyn RecordPayload>,
}

impl Record {
    /// A freshly created record: `modified` starts at 0 (never edited).
    pub fn new(created: RecordId, payload: Box<dyn RecordPayload>) -> Self {
        Self {
            created,
            modified: 0,
            payload,
        }
    }

    /// Canonical object form: `_created` first, `_modified` second when
    /// nonzero, then the payload's own fields (§4.1, §6).
    pub fn to_canonical(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("_created".to_string(), Value::from(self.created));
        if self.modified != 0 {
            map.insert("_modified".to_string(), Value::from(self.modified));
        }
        if let Value::Object(fields) = self.payload.to_canonical() {
            for (key, value) in fields {
                map.insert(key, value);
            }
        }
        Value::Object(map)
    }

    /// Rebuild a record from its canonical form, looking up the payload
    /// parser for `type_name` in `registry`.
    pub fn from_canonical(registry: &TypeRegistry, type_name: &str, value: &Value) -> Result<Self> {
        let created = value
            .get("_created")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Codec(format!("{type_name}: record missing _created")))?;
        let modified = value.get("_modified").and_then(Value::as_u64).unwrap_or(0);

        let mut fields = value
            .as_object()
            .cloned()
            .ok_or_else(|| Error::Codec(format!("{type_name}: record must be an object")))?;
        fields.remove("_created");
        fields.remove("_modified");

        let payload = registry.parse(type_name, &Value::Object(fields))?;
        Ok(Record {
            created,
            modified,
            payload,
        })
    }

    pub fn display(&self) -> String {
        format!("#{} {}", self.created, self.payload.display())
    }
}

impl Clone for Record {
    fn clone(&self) -> Self {
        Self {
            created: self.created,
            modified: self.modified,
            payload: self.payload.clone_payload(),
        }
    }
}

impl PartialEq for Record {
    /// Equality modulo nothing — two clones of the same record, including
    /// intrinsic fields. Payload-only equality lives on `RecordPayload`.
    fn eq(&self, other: &Self) -> bool {
        self.created == other.created
            && self.modified == other.modified
            && self.payload.payload_eq(other.payload.as_ref())
    }
}

/// A compact record of a deletion: payload is discarded (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tombstone {
    pub created: RecordId,
    pub deleted: Timestamp,
}

impl Tombstone {
    pub fn to_canonical(&self) -> Value {
        serde_json::json!({ "_created": self.created, "_deleted": self.deleted })
    }

    pub fn from_canonical(value: &Value) -> Result<Self> {
        let created = value
            .get("_created")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Codec("tombstone missing _created".into()))?;
        let deleted = value
            .get("_deleted")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Codec("tombstone missing _deleted".into()))?;
        Ok(Tombstone { created, deleted })
    }
}
