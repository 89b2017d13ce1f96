//! The sync engine (C7): the state machine that drives `init`/`save`/
//! `edit`/`delete`/`resolve` across the local record store (C5), the
//! encrypted cache (C4), and the remote authoritative store over a
//! [`Transport`] (§4.7).
//!
//! Grounded on the starting point's `store.rs::reconcile()` orchestration
//! shape and its `tracing` instrumentation style, generalized from a
//! single collection-bound call into the five-state machine SPEC_FULL.md
//! §4.7 specifies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::LocalCache;
use crate::clock::Clock;
use crate::codec;
use crate::delta::{self, RankIndex, TypeIndex};
use crate::error::{Error, Result};
use crate::hash::{hash_default, is_well_formed, Algorithm};
use crate::payload::RecordPayload;
use crate::record::{Record, RecordId, Timestamp};
use crate::store::RecordStore;
use crate::transport::Transport;

/// Where the sync state machine currently sits (§4.7). Distinct from
/// [`SyncResult`]: this is the engine's live status, that is the
/// outcome of one pass through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Comparing,
    Reconciling,
    Resolving,
    Committing,
    Synced,
    Failed,
}

impl SyncState {
    fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Comparing => "comparing",
            SyncState::Reconciling => "reconciling",
            SyncState::Resolving => "resolving",
            SyncState::Committing => "committing",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        }
    }
}

/// The outcome of one `sync`/`resolve` pass. Frozen once `succeeds` is
/// true: a caller that wants to act on a later state takes a fresh one.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub succeeds: bool,
    pub hash: String,
    pub time: Timestamp,
    /// Non-empty only when `succeeds` is false because the reconciler
    /// reported conflicts; pass the caller's picks to `resolve`.
    pub conflicts: TypeIndex,
}

impl SyncResult {
    fn synced(hash: String, time: Timestamp) -> Self {
        Self {
            succeeds: true,
            hash,
            time,
            conflicts: TypeIndex::new(),
        }
    }

    fn awaiting_resolution(hash: String, time: Timestamp, conflicts: TypeIndex) -> Self {
        Self {
            succeeds: false,
            hash,
            time,
            conflicts,
        }
    }
}

/// Resolves open question 1: how `init` behaves when `K-data` is absent.
/// `StartEmpty` treats the miss as a declined reload (an empty local
/// store, synced from `LastSync = 0`); `FetchRemote` surfaces the
/// underlying `StorageError` instead, as the cue for a caller to fetch a
/// snapshot out-of-band and hand it to [`SyncEngine::load_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPolicy {
    StartEmpty,
    FetchRemote,
}

fn wrap(state: SyncState, err: Error) -> Error {
    Error::Sync {
        state: state.as_str(),
        source: Box::new(err),
    }
}

fn apply_ranks_to_store(store: &mut RecordStore, response: &TypeIndex) -> Result<()> {
    for (type_name, rank) in response.iter() {
        apply_rank(store, type_name, rank)?;
    }
    Ok(())
}

fn apply_rank(store: &mut RecordStore, type_name: &str, rank: &RankIndex) -> Result<()> {
    for record in rank.new.values() {
        store.add(type_name, record.clone())?;
    }
    for record in rank.modified.values() {
        store.replace(type_name, record.clone())?;
    }
    for tombstone in rank.deleted.values() {
        store.remove(type_name, tombstone.created, tombstone.deleted, true)?;
    }
    Ok(())
}

fn has_conflicts(response: &TypeIndex) -> bool {
    response.iter().any(|(_, rank)| !rank.conflict.is_empty())
}

async fn store_hash(store: &Mutex<RecordStore>) -> String {
    let guard = store.lock().await;
    hash_default(&codec::serialize(&guard))
}

/// Composes the record store (C5), the encrypted cache (C4), and a
/// [`Transport`] into the public `init`/`save`/`edit`/`delete`/`resolve`
/// surface (§4.7, §6). One [`SyncEngine`] serves exactly one client
/// identity talking to one remote store.
pub struct SyncEngine {
    store: Mutex<RecordStore>,
    cache: LocalCache,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    last_sync: AtomicU64,
    state: Mutex<SyncState>,
    /// Serializes `init`/`save`/`edit`/`delete`/`resolve` per client (§5):
    /// the store, the cache, and the remote write of one operation are
    /// never interleaved with another's.
    op_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: RecordStore,
        cache: LocalCache,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            cache,
            transport,
            clock,
            last_sync: AtomicU64::new(0),
            state: Mutex::new(SyncState::Idle),
            op_lock: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> SyncState {
        *self.state.lock().await
    }

    pub fn last_sync(&self) -> Timestamp {
        self.last_sync.load(Ordering::SeqCst)
    }

    async fn set_state(&self, next: SyncState) {
        let mut state = self.state.lock().await;
        tracing::debug!(from = ?*state, to = ?next, "sync state transition");
        *state = next;
    }

    /// Read-only lookup directly against the in-memory store (§6
    /// "search"), bypassing the sync pipeline entirely.
    pub async fn search(&self, type_name: &str, predicate: impl Fn(&Record) -> bool) -> Vec<Record> {
        let store = self.store.lock().await;
        store
            .active(type_name)
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    /// Loads a canonical snapshot (e.g. one fetched out-of-band from the
    /// remote store) into the local store. Used to resolve open question
    /// 1 under [`SeedPolicy::FetchRemote`].
    pub async fn load_snapshot(&self, canonical_json: &str) -> Result<()> {
        let value = codec::parse(canonical_json.as_bytes())?;
        let mut store = self.store.lock().await;
        codec::load_into(&mut store, &value)
    }

    /// Loads `K-data` into the store and immediately attempts a sync
    /// (§4.7 step 1, §9 open question 1).
    pub async fn init(&self, seed: SeedPolicy) -> Result<SyncResult> {
        let _guard = self.op_lock.lock().await;
        let reload_declined = matches!(seed, SeedPolicy::StartEmpty);
        let plaintext = self.cache.read_data(reload_declined)?;
        let value = codec::parse(plaintext.as_bytes())?;
        {
            let mut store = self.store.lock().await;
            codec::load_into(&mut store, &value)?;
        }
        self.last_sync
            .store(self.cache.read_last_sync()?, Ordering::SeqCst);
        tracing::info!(seed = ?seed, "sync engine initialized");
        self.sync_locked(None, None).await
    }

    /// Allocates an ID, inserts `payload` as a new record under
    /// `type_name`, writes the local cache and the remote `add` in
    /// parallel, then syncs to confirm convergence (§4.7, §5).
    pub async fn save(
        &self,
        type_name: &str,
        payload: Box<dyn RecordPayload>,
    ) -> Result<(Record, SyncResult)> {
        let _guard = self.op_lock.lock().await;
        self.sync_locked(None, None).await?;

        let now = self.clock.now();
        let record = {
            let mut store = self.store.lock().await;
            let id = store.new_id(now);
            let record = Record::new(id, payload);
            store.add(type_name, record.clone())?;
            record
        };

        let plaintext = self.plaintext_snapshot().await?;
        let (local_hash, remote_hash) = tokio::try_join!(
            async { self.cache.write_data(&plaintext) },
            self.transport.add(type_name, &record),
        )?;

        let result = self
            .sync_locked(Some(local_hash), Some(remote_hash))
            .await?;
        Ok((record, result))
    }

    /// Replaces an existing record in place, stamping `modified = now()`
    /// before writing the local cache and the remote `edit` in parallel,
    /// then syncs (§4.7, §5).
    pub async fn edit(&self, type_name: &str, mut record: Record) -> Result<SyncResult> {
        let _guard = self.op_lock.lock().await;
        self.sync_locked(None, None).await?;

        let now = self.clock.now();
        record.modified = if now > record.created { now } else { record.created + 1 };

        {
            let mut store = self.store.lock().await;
            store.replace(type_name, record.clone())?;
        }

        let plaintext = self.plaintext_snapshot().await?;
        let (local_hash, remote_hash) = tokio::try_join!(
            async { self.cache.write_data(&plaintext) },
            self.transport.edit(type_name, &record),
        )?;

        self.sync_locked(Some(local_hash), Some(remote_hash)).await
    }

    /// Removes `record` locally (tombstoning it), writing the local cache
    /// and the remote `delete` in parallel, then syncs (§4.7, §5).
    pub async fn delete(&self, type_name: &str, record: Record) -> Result<SyncResult> {
        let _guard = self.op_lock.lock().await;
        self.sync_locked(None, None).await?;

        let now = self.clock.now();
        {
            let mut store = self.store.lock().await;
            store.remove(type_name, record.created, now, true)?;
        }

        let plaintext = self.plaintext_snapshot().await?;
        let (local_hash, remote_hash) = tokio::try_join!(
            async { self.cache.write_data(&plaintext) },
            self.transport.delete(type_name, &record),
        )?;

        self.sync_locked(Some(local_hash), Some(remote_hash)).await
    }

    /// Applies the caller's conflict picks both locally and on the remote
    /// store, then re-enters `Comparing` with fresh hashes (§4.7 step 3,
    /// §9 open question 2). This is the only entry point back out of
    /// `SyncState::Resolving`.
    pub async fn resolve(&self, chosen: TypeIndex) -> Result<SyncResult> {
        let _guard = self.op_lock.lock().await;
        self.set_state(SyncState::Resolving).await;

        {
            let mut store = self.store.lock().await;
            apply_ranks_to_store(&mut store, &chosen).map_err(|e| wrap(SyncState::Resolving, e))?;
        }

        let (hash, data_value) = self
            .transport
            .resolve(&chosen)
            .await
            .map_err(|e| wrap(SyncState::Resolving, e))?;

        let registry = {
            let store = self.store.lock().await;
            store.registry().clone()
        };
        let response = TypeIndex::from_json(&data_value, &registry)
            .map_err(|e| wrap(SyncState::Resolving, e))?;
        {
            let mut store = self.store.lock().await;
            apply_ranks_to_store(&mut store, &response)
                .map_err(|e| wrap(SyncState::Resolving, e))?;
        }

        self.sync_locked(None, Some(hash)).await
    }

    /// The public `sync(localHash?, remoteHash?)` surface (§6): acquires
    /// the single-writer lock itself, unlike `sync_locked` which assumes
    /// a caller already holds it.
    pub async fn sync(
        &self,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) -> Result<SyncResult> {
        let _guard = self.op_lock.lock().await;
        self.sync_locked(local_hash, remote_hash).await
    }

    async fn plaintext_snapshot(&self) -> Result<String> {
        let store = self.store.lock().await;
        String::from_utf8(codec::serialize(&store)).map_err(|e| Error::Codec(e.to_string()))
    }

    /// The four-step Comparing → Reconciling → (Resolving |) Committing
    /// pipeline (§4.7). Assumes `op_lock` is already held.
    async fn sync_locked(
        &self,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) -> Result<SyncResult> {
        self.set_state(SyncState::Comparing).await;
        let local_hash = match local_hash {
            Some(hash) => hash,
            None => store_hash(&self.store).await,
        };
        let remote_hash = match remote_hash {
            Some(hash) => hash,
            None => self
                .transport
                .hash()
                .await
                .map_err(|e| wrap(SyncState::Comparing, e))?,
        };
        if !is_well_formed(&remote_hash, Algorithm::Sha256) {
            self.set_state(SyncState::Failed).await;
            return Err(wrap(
                SyncState::Comparing,
                Error::Transport(format!("malformed remote hash: {remote_hash:?}")),
            ));
        }

        if local_hash == remote_hash {
            let time = self.clock.now();
            self.cache.write_last_sync(time)?;
            self.last_sync.store(time, Ordering::SeqCst);
            self.set_state(SyncState::Synced).await;
            tracing::info!(hash = %remote_hash, "sync converged without reconciliation");
            return Ok(SyncResult::synced(remote_hash, time));
        }

        self.set_state(SyncState::Reconciling).await;
        let last_sync = self.last_sync();
        let client_delta = {
            let store = self.store.lock().await;
            delta::compile(&store, last_sync)
        };
        let (authoritative_hash, data_value) = self
            .transport
            .reconcile(last_sync, &client_delta)
            .await
            .map_err(|e| wrap(SyncState::Reconciling, e))?;

        let registry = {
            let store = self.store.lock().await;
            store.registry().clone()
        };
        let response = TypeIndex::from_json(&data_value, &registry)
            .map_err(|e| wrap(SyncState::Reconciling, e))?;
        {
            let mut store = self.store.lock().await;
            apply_ranks_to_store(&mut store, &response)
                .map_err(|e| wrap(SyncState::Reconciling, e))?;
        }

        if has_conflicts(&response) {
            self.set_state(SyncState::Resolving).await;
            let time = self.clock.now();
            tracing::warn!(hash = %authoritative_hash, "sync reconciled with outstanding conflicts");
            return Ok(SyncResult::awaiting_resolution(
                authoritative_hash,
                time,
                response,
            ));
        }

        self.set_state(SyncState::Committing).await;
        let local_hash_after = store_hash(&self.store).await;
        if local_hash_after != authoritative_hash {
            self.set_state(SyncState::Failed).await;
            return Err(Error::SyncFailed {
                local: local_hash_after,
                remote: authoritative_hash,
            });
        }

        let plaintext = self.plaintext_snapshot().await?;
        self.cache.write_data(&plaintext)?;
        let time = self.clock.now();
        self.cache.write_last_sync(time)?;
        self.last_sync.store(time, Ordering::SeqCst);
        self.set_state(SyncState::Synced).await;
        tracing::info!(hash = %authoritative_hash, "sync converged after reconciliation");
        Ok(SyncResult::synced(authoritative_hash, time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKvStore;
    use crate::clock::FakeClock;
    use crate::payload::{JsonPayload, TypeRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.register_json("notes");
        r
    }

    /// A hand-scripted [`Transport`] for unit-level state-machine tests:
    /// canned responses, no real reconciliation logic.
    struct StubTransport {
        hash: StdMutex<String>,
        reconcile_response: StdMutex<(String, Value)>,
    }

    impl StubTransport {
        fn new(hash: &str) -> Self {
            Self {
                hash: StdMutex::new(hash.to_string()),
                reconcile_response: StdMutex::new((hash.to_string(), json!({}))),
            }
        }

        fn set_reconcile_response(&self, hash: &str, data: Value) {
            *self.reconcile_response.lock().unwrap() = (hash.to_string(), data);
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn hash(&self) -> Result<String> {
            Ok(self.hash.lock().unwrap().clone())
        }

        async fn add(&self, _type_name: &str, _record: &Record) -> Result<String> {
            Ok(self.hash.lock().unwrap().clone())
        }

        async fn edit(&self, _type_name: &str, _record: &Record) -> Result<String> {
            Ok(self.hash.lock().unwrap().clone())
        }

        async fn delete(&self, _type_name: &str, _record: &Record) -> Result<String> {
            Ok(self.hash.lock().unwrap().clone())
        }

        async fn reconcile(&self, _last_sync: Timestamp, _delta: &TypeIndex) -> Result<(String, Value)> {
            Ok(self.reconcile_response.lock().unwrap().clone())
        }

        async fn resolve(&self, _chosen: &TypeIndex) -> Result<(String, Value)> {
            Ok(self.reconcile_response.lock().unwrap().clone())
        }
    }

    fn engine(transport: Arc<StubTransport>, clock: Arc<FakeClock>) -> SyncEngine {
        let cache = LocalCache::new(Box::new(MemoryKvStore::new()), "K", "test-password");
        SyncEngine::new(RecordStore::new(registry()), cache, transport, clock)
    }

    #[tokio::test]
    async fn sync_with_equal_hashes_converges_without_reconciling() {
        let clock = Arc::new(FakeClock::new(1_000));
        let empty_hash = hash_default(&codec::serialize(&RecordStore::new(registry())));
        let transport = Arc::new(StubTransport::new(&empty_hash));
        let engine = engine(transport, clock);

        let result = engine.sync(None, None).await.unwrap();
        assert!(result.succeeds);
        assert_eq!(engine.state().await, SyncState::Synced);
        assert_eq!(engine.last_sync(), 1_000);
    }

    #[tokio::test]
    async fn sync_failed_when_local_hash_does_not_match_reconcile_response_hash() {
        let clock = Arc::new(FakeClock::new(1_000));
        let transport = Arc::new(StubTransport::new("remote-hash"));
        transport.set_reconcile_response("still-does-not-match", json!({}));
        let engine = engine(transport, clock);

        let err = engine.sync(None, None).await.unwrap_err();
        assert!(matches!(err, Error::SyncFailed { .. }));
        assert_eq!(engine.state().await, SyncState::Failed);
    }

    #[tokio::test]
    async fn sync_applies_new_records_from_reconcile_response() {
        let clock = Arc::new(FakeClock::new(1_000));
        let transport = Arc::new(StubTransport::new("remote-hash"));
        let engine = engine(transport.clone(), clock);

        let data = json!({
            "notes": {"new": {"500": {"_created": 500, "title": "from server"}}}
        });
        let store_after = {
            let mut store = RecordStore::new(registry());
            store
                .add(
                    "notes",
                    Record::new(500, Box::new(JsonPayload(json!({"title": "from server"})))),
                )
                .unwrap();
            hash_default(&codec::serialize(&store))
        };
        transport.set_reconcile_response(&store_after, data);

        let result = engine.sync(None, None).await.unwrap();
        assert!(result.succeeds);
        let found = engine.search("notes", |r| r.created == 500).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn sync_reports_conflicts_without_committing() {
        let clock = Arc::new(FakeClock::new(1_000));
        let transport = Arc::new(StubTransport::new("remote-hash"));
        let data = json!({
            "notes": {
                "conflict": {
                    "700": [
                        {"_created": 700, "title": "server side"},
                        {"_created": 700, "title": "client side"},
                    ]
                }
            }
        });
        transport.set_reconcile_response("remote-hash", data);
        let engine = engine(transport, clock);

        let result = engine.sync(None, None).await.unwrap();
        assert!(!result.succeeds);
        assert!(!result.conflicts.is_empty());
        assert_eq!(engine.state().await, SyncState::Resolving);
        // LastSync must not advance while conflicts are outstanding.
        assert_eq!(engine.last_sync(), 0);
    }

    #[tokio::test]
    async fn resolve_applies_chosen_versions_and_resyncs() {
        let clock = Arc::new(FakeClock::new(1_000));
        let transport = Arc::new(StubTransport::new("remote-hash"));
        let engine = engine(transport.clone(), clock);

        let mut chosen = TypeIndex::new();
        let mut rank = RankIndex::default();
        rank.new.insert(
            900,
            Record::new(900, Box::new(JsonPayload(json!({"title": "resolved"})))),
        );
        chosen.insert_if_nonempty("notes", rank);

        let resolved_hash = {
            let mut store = RecordStore::new(registry());
            store
                .add(
                    "notes",
                    Record::new(900, Box::new(JsonPayload(json!({"title": "resolved"})))),
                )
                .unwrap();
            hash_default(&codec::serialize(&store))
        };
        transport.set_reconcile_response(&resolved_hash, json!({}));

        let result = engine.resolve(chosen).await.unwrap();
        assert!(result.succeeds);
        let found = engine.search("notes", |r| r.created == 900).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn edit_stamps_modified_so_it_surfaces_as_a_delta() {
        let clock = Arc::new(FakeClock::new(1_000));
        let record = Record::new(100, Box::new(JsonPayload(json!({"title": "original"}))));

        let hash_before = {
            let mut store = RecordStore::new(registry());
            store.add("notes", record.clone()).unwrap();
            hash_default(&codec::serialize(&store))
        };
        let transport = Arc::new(StubTransport::new(&hash_before));
        let engine = engine(transport.clone(), clock.clone());
        {
            let mut store = engine.store.lock().await;
            store.add("notes", record.clone()).unwrap();
        }

        clock.advance(500);
        let mut edited = record.clone();
        edited.modified = 1_500;
        let hash_after = {
            let mut store = RecordStore::new(registry());
            store.add("notes", edited).unwrap();
            hash_default(&codec::serialize(&store))
        };
        transport.set_reconcile_response(&hash_after, json!({}));

        engine.edit("notes", record).await.unwrap();

        let found = engine.search("notes", |r| r.created == 100).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].modified, 1_500);

        let since_before_edit = delta::compile(&*engine.store.lock().await, 1_000);
        let rank = since_before_edit.get("notes").unwrap();
        assert!(rank.modified.contains_key(&100));
    }

    #[tokio::test]
    async fn sync_rejects_malformed_remote_hash() {
        let clock = Arc::new(FakeClock::new(1_000));
        let transport = Arc::new(StubTransport::new("not-a-real-hash"));
        let engine = engine(transport, clock);

        let err = engine.sync(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Sync { state: "comparing", .. }));
        assert_eq!(engine.state().await, SyncState::Failed);
        // A rejected malformed hash must not advance LastSync.
        assert_eq!(engine.last_sync(), 0);
    }
}
