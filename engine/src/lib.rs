//! Carry Engine: a local-first record sync core built around
//! content-addressed comparison instead of an operation log or a
//! logical clock.
//!
//! Every client holds a full copy of its records in an encrypted local
//! cache ([`cache`]). A sync compares a SHA-256 hash of the local
//! canonical record set ([`codec`], [`hash`]) against the remote
//! authoritative store's hash; if they differ, the client compiles a
//! delta of everything it has touched since its last sync ([`delta`])
//! and hands it to the remote store to reconcile against its own delta
//! over the same window ([`reconcile`]). Only records the reconciler
//! couldn't place unambiguously come back as conflicts, left for an
//! external collaborator — human or policy — to resolve.
//!
//! [`sync::SyncEngine`] composes all of this into the state machine
//! described by [`sync::SyncState`]: `Idle -> Comparing -> Reconciling ->
//! (Resolving ->) Committing -> Synced`, reached through `init`, `save`,
//! `edit`, `delete`, and `resolve`.
//!
//! ```no_run
//! # async fn example() -> carry_engine::error::Result<()> {
//! use std::sync::Arc;
//! use carry_engine::cache::{LocalCache, MemoryKvStore};
//! use carry_engine::clock::SystemClock;
//! use carry_engine::payload::{JsonPayload, TypeRegistry};
//! use carry_engine::store::RecordStore;
//! use carry_engine::sync::{SeedPolicy, SyncEngine};
//! use carry_engine::transport::HttpTransport;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_json("notes");
//!
//! let cache = LocalCache::new(Box::new(MemoryKvStore::new()), "K", "a-real-secret");
//! let transport = Arc::new(HttpTransport::new("https://sync.example.com"));
//! let engine = SyncEngine::new(
//!     RecordStore::new(registry),
//!     cache,
//!     transport,
//!     Arc::new(SystemClock),
//! );
//!
//! engine.init(SeedPolicy::StartEmpty).await?;
//! let (record, _) = engine
//!     .save("notes", Box::new(JsonPayload(serde_json::json!({"title": "hi"}))))
//!     .await?;
//! println!("{}", record.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod codec;
pub mod crypto;
pub mod delta;
pub mod error;
pub mod hash;
pub mod payload;
pub mod record;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod sync;
pub mod transport;

pub use cache::{FileKvStore, KvStore, LocalCache, MemoryKvStore, DEFAULT_PASSWORD};
pub use clock::{Clock, FakeClock, SystemClock};
pub use crypto::CipherObject;
pub use delta::{ConflictVersion, IdIndex, RankIndex, TypeIndex};
pub use error::{Error, Result};
pub use hash::Algorithm;
pub use payload::{JsonPayload, PayloadParser, RecordPayload, TypeRegistry};
pub use record::{Record, RecordId, Timestamp, Tombstone};
pub use reconcile::ReconcileOutcome;
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};
pub use store::RecordStore;
pub use sync::{SeedPolicy, SyncEngine, SyncResult, SyncState};
pub use transport::{HttpTransport, Transport};
