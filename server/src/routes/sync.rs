//! The §6 wire protocol's two endpoints: one dispatched POST and one
//! convenience GET for the `hash` query.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::Value;

use crate::error::Result;
use crate::handlers;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", axum::routing::post(sync_handler))
        .route("/sync/hash", get(hash_handler))
}

/// POST /sync - dispatch on the body's `query` field.
async fn sync_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let response = handlers::handle_sync(&state.pool, &state.registry, &state.schema, body).await?;
    Ok(Json(response))
}

/// GET /sync and GET /sync/hash - the `hash` query without a body.
async fn hash_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    let response = handlers::handle_hash(&state.pool, &state.registry).await?;
    Ok(Json(response))
}
