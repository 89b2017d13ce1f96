//! Authoritative persistence (C10): `sqlx`/PostgreSQL-backed storage of
//! the authoritative record set and tombstones that C8 reads and
//! mutates server-side (§4.8).
//!
//! The reconciler itself stays storage-agnostic — it operates on an
//! in-memory [`RecordStore`], mirroring the starting point's split
//! between the pure `Reconciler` (in `engine`) and the I/O-performing
//! `db` module (here). Every request loads the full store inside its
//! own transaction, mutates it in memory, and writes the whole thing
//! back before committing: simpler than per-record diffing and correct,
//! at the cost of O(total records) work per request — acceptable for a
//! reference implementation, not a production sizing target.

mod pool;

pub use pool::*;

use carry_engine::payload::{RecordPayload, TypeRegistry};
use carry_engine::record::{Record, RecordId, Timestamp, Tombstone};
use carry_engine::store::RecordStore;
use serde_json::Value;
use sqlx::{FromRow, PgConnection};

#[derive(Debug, FromRow)]
struct ActiveRow {
    type_name: String,
    created: i64,
    modified: i64,
    payload: Value,
}

#[derive(Debug, FromRow)]
struct TombstoneRow {
    type_name: String,
    created: i64,
    deleted: i64,
}

fn record_from_row(registry: &TypeRegistry, row: ActiveRow) -> Result<(String, Record), carry_engine::Error> {
    let mut value = row.payload;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| carry_engine::Error::Codec(format!("{}: stored payload must be an object", row.type_name)))?;
    obj.insert("_created".to_string(), Value::from(row.created as RecordId));
    if row.modified != 0 {
        obj.insert("_modified".to_string(), Value::from(row.modified as Timestamp));
    }
    let record = Record::from_canonical(registry, &row.type_name, &value)?;
    Ok((row.type_name, record))
}

/// Rebuild the authoritative `RecordStore` from every row currently
/// persisted for `registry`'s configured types.
pub async fn load_store(
    conn: &mut PgConnection,
    registry: &TypeRegistry,
) -> Result<RecordStore, crate::error::AppError> {
    let mut store = RecordStore::new(registry.clone());

    let active_rows: Vec<ActiveRow> = sqlx::query_as(
        "SELECT type_name, created, modified, payload FROM active_records ORDER BY type_name, created DESC",
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in active_rows {
        let (type_name, record) = record_from_row(registry, row)?;
        store.add(&type_name, record)?;
    }

    let tombstone_rows: Vec<TombstoneRow> = sqlx::query_as(
        "SELECT type_name, created, deleted FROM tombstones ORDER BY type_name, created DESC",
    )
    .fetch_all(&mut *conn)
    .await?;
    for row in tombstone_rows {
        let tombstone = Tombstone {
            created: row.created as RecordId,
            deleted: row.deleted as Timestamp,
        };
        store.load_tombstone(&row.type_name, tombstone)?;
    }

    Ok(store)
}

/// Replace every row for `registry`'s configured types with `store`'s
/// current content. Intended to run inside the same transaction
/// [`load_store`] read from, so the read-modify-write cycle is atomic
/// at the database level (§5).
pub async fn persist_store(
    conn: &mut PgConnection,
    registry: &TypeRegistry,
    store: &RecordStore,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM active_records").execute(&mut *conn).await?;
    sqlx::query("DELETE FROM tombstones").execute(&mut *conn).await?;

    for type_name in registry.type_order() {
        for record in store.active(type_name) {
            sqlx::query(
                "INSERT INTO active_records (type_name, created, modified, payload) VALUES ($1, $2, $3, $4)",
            )
            .bind(type_name)
            .bind(record.created as i64)
            .bind(record.modified as i64)
            .bind(record.payload.to_canonical())
            .execute(&mut *conn)
            .await?;
        }
        for tombstone in store.tombstones(type_name) {
            sqlx::query("INSERT INTO tombstones (type_name, created, deleted) VALUES ($1, $2, $3)")
                .bind(type_name)
                .bind(tombstone.created as i64)
                .bind(tombstone.deleted as i64)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}
