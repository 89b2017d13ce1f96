//! The local cache (C4): an encrypted persistent key-value read/write
//! over a host-provided map, plus the last-sync watermark.
//!
//! Generalizes the reference codebase's `StoreSnapshot::to_json`/
//! `from_json` export/import round-trip (`engine/src/snapshot.rs` in the
//! starting point) by routing the same plaintext through the crypto box
//! (C3) and a trait-abstracted backing store, per SPEC_FULL.md §9's
//! "inject... into the store at construction" guidance generalized to
//! every implicit global the starting point leaned on.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypto::{self, CipherObject};
use crate::error::{Error, Result};
use crate::hash::hash_default;
use crate::record::Timestamp;

/// The host-provided persistent string-to-string map this crate's only
/// I/O dependency: reading and writing it is the collaborator's job, not
/// the core's (§1, §9 "inject... at construction").
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// A reference [`KvStore`] backed by one file per key under a directory.
/// Not part of the core's contract — provided so the crate and its
/// tests are runnable without a host application (§4.4).
#[derive(Debug)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are namespaced prefixes like "K-data"; sanitize any path
        // separators defensively since the prefix is caller-configured.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(safe)
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value).map_err(|e| Error::Storage(e.to_string()))
    }
}

/// An in-memory [`KvStore`], useful for tests and for hosts that persist
/// the map some other way (e.g. the Flutter layer's own storage plugin
/// mediated through FFI upstream of this crate).
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Default password used when no override is configured. Per §4.3, this
/// MUST be replaced before any real deployment; using it is logged loudly.
pub const DEFAULT_PASSWORD: &str = "carry-development-only-change-me";

/// Encrypted persistent read/write over a [`KvStore`], namespaced under
/// a configured key prefix.
pub struct LocalCache {
    store: Box<dyn KvStore>,
    prefix: String,
    password: String,
}

impl LocalCache {
    pub fn new(store: Box<dyn KvStore>, prefix: impl Into<String>, password: impl Into<String>) -> Self {
        let password = password.into();
        if password == DEFAULT_PASSWORD {
            tracing::warn!(
                "carry_engine::cache is using the built-in default password; \
                 replace it with a real secret before shipping"
            );
        }
        Self {
            store,
            prefix: prefix.into(),
            password,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix, suffix)
    }

    /// Read and decrypt `K-data`. If the key is absent and `reload_declined`
    /// is true (the host signaled the user declined a remote reload, §6),
    /// returns the literal string `"{}"`. If absent and the caller has not
    /// declined a reload, fails with `StorageError` — the caller is
    /// expected to seed from the remote store instead.
    pub fn read_data(&self, reload_declined: bool) -> Result<String> {
        match self.store.get(&self.key("data"))? {
            Some(ciphertext_json) => {
                let object = CipherObject::from_bytes(ciphertext_json.as_bytes())?;
                let plaintext = crypto::decrypt(&object, &self.password)?;
                String::from_utf8(plaintext).map_err(|e| Error::Crypto(e.to_string()))
            }
            None if reload_declined => Ok("{}".to_string()),
            None => Err(Error::Storage(format!("{}: no data present", self.key("data")))),
        }
    }

    /// Encrypt and store `data` under `K-data`. Returns the hex SHA-256
    /// hash of the plaintext bytes *before* encryption (§4.4, §9 open
    /// question 4) so the caller can reuse it as a sync's `localHash`.
    pub fn write_data(&self, data: &str) -> Result<String> {
        let object = crypto::encrypt(data.as_bytes(), &self.password)?;
        let serialized = String::from_utf8(object.to_bytes()).expect("hex json is valid utf-8");
        self.store.set(&self.key("data"), &serialized)?;
        Ok(hash_default(data.as_bytes()))
    }

    /// Read `K-sync`: the last successful sync timestamp, `0` if absent
    /// (never synced). Stored as a plain decimal string, not encrypted —
    /// it carries no record content.
    pub fn read_last_sync(&self) -> Result<Timestamp> {
        match self.store.get(&self.key("sync"))? {
            Some(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::Storage(format!("malformed K-sync value: {text:?}"))),
            None => Ok(0),
        }
    }

    /// Write `K-sync` as a decimal string.
    pub fn write_last_sync(&self, timestamp: Timestamp) -> Result<()> {
        self.store.set(&self.key("sync"), &timestamp.to_string())
    }
}
