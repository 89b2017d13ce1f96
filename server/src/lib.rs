//! Reference authoritative store and §6 wire transport for
//! `carry-engine`, split into a library so integration tests can spin up
//! a real instance of the router against a test database.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod types;

use std::sync::Arc;

use axum::Router;
use carry_engine::payload::TypeRegistry;
use carry_engine::schema::Schema;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Pool;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub registry: Arc<TypeRegistry>,
    pub schema: Arc<Schema>,
}

impl AppState {
    /// Build state from a pool and config, using this reference
    /// deployment's demo type set ([`types::registry`], [`types::schema`]).
    pub fn new(pool: Pool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            registry: Arc::new(types::registry()),
            schema: Arc::new(types::schema()),
        }
    }
}

/// Assemble the full router, with tracing and permissive CORS layered on
/// (§9 "Open Questions" treats cross-origin policy as deployment-specific;
/// this reference server stays permissive).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
