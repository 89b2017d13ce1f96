//! Dispatches the single `POST /sync` body (§6) against the
//! authoritative store, plus the GET-exposed `hash` query.
//!
//! Grounded on the starting point's `handle_push`/`handle_pull`
//! (function-per-request, `Result<T, AppError>` idiom, `tracing`
//! instrumentation); the dispatch shape itself is new — this protocol
//! has one query-tagged endpoint, not a push/pull pair.

use carry_engine::clock::{Clock, SystemClock};
use carry_engine::codec;
use carry_engine::delta::TypeIndex;
use carry_engine::hash::hash_default;
use carry_engine::payload::TypeRegistry;
use carry_engine::record::Record;
use carry_engine::reconcile;
use carry_engine::schema::Schema;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::db;
use crate::error::{AppError, Result};

/// One of `add`/`edit`/`delete`: all three share a request shape
/// (`{type, instance}`) and differ only in which store mutation they
/// drive.
enum Mutation {
    Add,
    Edit,
    Delete,
}

/// Dispatch on the body's `query` field (§6).
pub async fn handle_sync(
    pool: &PgPool,
    registry: &TypeRegistry,
    schema: &Schema,
    body: Value,
) -> Result<Value> {
    let query = body
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("missing \"query\" field".into()))?
        .to_string();

    tracing::debug!(query = %query, "dispatching sync query");

    match query.as_str() {
        "hash" => handle_hash(pool, registry).await,
        "add" => handle_mutate(pool, registry, schema, &body, Mutation::Add).await,
        "edit" => handle_mutate(pool, registry, schema, &body, Mutation::Edit).await,
        "delete" => handle_mutate(pool, registry, schema, &body, Mutation::Delete).await,
        "reconcile" => handle_reconcile(pool, registry, &body).await,
        "resolve" => handle_resolve(pool, registry, &body).await,
        other => Err(AppError::BadRequest(format!("unknown query: {other}"))),
    }
}

/// The `hash` query (§6), also reachable via `GET /sync/hash`.
pub async fn handle_hash(pool: &PgPool, registry: &TypeRegistry) -> Result<Value> {
    let mut conn = pool.acquire().await?;
    let store = db::load_store(&mut conn, registry).await?;
    Ok(Value::String(hash_default(&codec::serialize(&store))))
}

fn require_configured(registry: &TypeRegistry, type_name: &str) -> Result<()> {
    if registry.contains(type_name) {
        Ok(())
    } else {
        Err(AppError::Engine(carry_engine::Error::Type(format!(
            "unconfigured type: {type_name}"
        ))))
    }
}

/// Validate `instance`'s payload fields against `schema` (when the type
/// has a registered schema) and parse the whole thing into a `Record`.
fn record_from_instance(
    registry: &TypeRegistry,
    schema: &Schema,
    type_name: &str,
    instance: &Value,
) -> Result<Record> {
    if let Some(collection) = schema.get_collection(type_name) {
        let mut payload_only = instance.clone();
        if let Some(obj) = payload_only.as_object_mut() {
            obj.remove("_created");
            obj.remove("_modified");
        }
        collection
            .validate_payload(&payload_only)
            .map_err(|e| AppError::Engine(carry_engine::Error::Type(e.to_string())))?;
    }
    Ok(Record::from_canonical(registry, type_name, instance)?)
}

/// The `add`/`edit`/`delete` queries (§6): load the full authoritative
/// store, apply one mutation, persist, and return the new hash — all
/// inside one transaction (§5).
async fn handle_mutate(
    pool: &PgPool,
    registry: &TypeRegistry,
    schema: &Schema,
    body: &Value,
    mutation: Mutation,
) -> Result<Value> {
    let type_name = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("missing \"type\" field".into()))?;
    let instance = body
        .get("instance")
        .ok_or_else(|| AppError::BadRequest("missing \"instance\" field".into()))?;
    require_configured(registry, type_name)?;

    let mut tx = pool.begin().await?;
    let mut store = db::load_store(&mut tx, registry).await?;

    match mutation {
        Mutation::Add => {
            let record = record_from_instance(registry, schema, type_name, instance)?;
            store.add(type_name, record)?;
        }
        Mutation::Edit => {
            let record = record_from_instance(registry, schema, type_name, instance)?;
            store.replace(type_name, record)?;
        }
        Mutation::Delete => {
            let created = instance
                .get("_created")
                .and_then(Value::as_u64)
                .ok_or_else(|| AppError::BadRequest("instance missing _created".into()))?;
            store.remove(type_name, created, SystemClock.now(), true)?;
        }
    }

    db::persist_store(&mut tx, registry, &store).await?;
    let hash = hash_default(&codec::serialize(&store));
    tx.commit().await?;
    tracing::info!(%type_name, hash = %hash, "authoritative store mutated");
    Ok(Value::String(hash))
}

/// The `reconcile` query (§4.8, §6): three-way merge of the client's
/// delta against the authoritative store.
async fn handle_reconcile(pool: &PgPool, registry: &TypeRegistry, body: &Value) -> Result<Value> {
    let data = body
        .get("data")
        .ok_or_else(|| AppError::BadRequest("missing \"data\" field".into()))?;
    let last_sync = data
        .get("sync")
        .and_then(Value::as_u64)
        .ok_or_else(|| AppError::BadRequest("missing \"data.sync\" field".into()))?;
    let instances = data.get("instances").cloned().unwrap_or_else(|| json!({}));

    let mut tx = pool.begin().await?;
    let mut store = db::load_store(&mut tx, registry).await?;
    let client_delta = TypeIndex::from_json(&instances, registry)?;
    let outcome = reconcile::reconcile(&mut store, last_sync, &client_delta)?;
    db::persist_store(&mut tx, registry, &store).await?;
    tx.commit().await?;

    tracing::info!(hash = %outcome.hash, last_sync, "reconcile completed");
    Ok(json!({"hash": outcome.hash, "data": outcome.data.to_json()}))
}

/// The `resolve` query (§4.7 step 3, §6): apply the caller's conflict
/// picks directly, without re-running conflict detection.
async fn handle_resolve(pool: &PgPool, registry: &TypeRegistry, body: &Value) -> Result<Value> {
    let data = body.get("data").cloned().unwrap_or_else(|| json!({}));

    let mut tx = pool.begin().await?;
    let mut store = db::load_store(&mut tx, registry).await?;
    let chosen = TypeIndex::from_json(&data, registry)?;
    let outcome = reconcile::resolve(&mut store, &chosen)?;
    db::persist_store(&mut tx, registry, &store).await?;
    tx.commit().await?;

    tracing::info!(hash = %outcome.hash, "resolve completed");
    Ok(json!({"hash": outcome.hash, "data": outcome.data.to_json()}))
}
