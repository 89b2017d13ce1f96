//! Error types for the sync core.
//!
//! Every fallible operation in this crate returns one of the variants
//! below. Variants map 1:1 onto the error kinds a caller needs to
//! distinguish: a malformed wire payload is not the same failure as a
//! network timeout, and applications are expected to branch on which.

use thiserror::Error;

use crate::record::RecordId;

/// The error type for all fallible operations in `carry_engine`.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input or a non-serializable value reached the codec.
    #[error("codec error: {0}")]
    Codec(String),

    /// Key derivation, AEAD, or RNG failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Host key-value I/O failure, or an absent key where one was required.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network failure, non-2xx response, or timeout talking to the
    /// authoritative store.
    #[error("transport error: {0}")]
    Transport(String),

    /// A record named a type that was not configured, or a constructor
    /// argument was invalid.
    #[error("type error: {0}")]
    Type(String),

    /// `add` would collide with an existing `created` in the same type.
    #[error("id conflict: created={0} already exists")]
    IdConflict(RecordId),

    /// `replace`/`remove` target is absent.
    #[error("no matching record for created={0}")]
    NoMatch(RecordId),

    /// An invalid or unimplemented reconciliation response: unknown rank,
    /// missing fields, or a shape the client does not recognize.
    #[error("reconcile error: {0}")]
    Reconcile(String),

    /// Hashes still differ after a full reconcile/resolve pass.
    #[error("sync failed: local hash {local} != remote hash {remote}")]
    SyncFailed { local: String, remote: String },

    /// The sync engine failed while in a particular state of its state
    /// machine; the state is preserved for diagnosis.
    #[error("sync error in state {state}: {source}")]
    Sync {
        state: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::IdConflict(100);
        assert_eq!(err.to_string(), "id conflict: created=100 already exists");

        let err = Error::SyncFailed {
            local: "aaa".into(),
            remote: "bbb".into(),
        };
        assert_eq!(
            err.to_string(),
            "sync failed: local hash aaa != remote hash bbb"
        );
    }

    #[test]
    fn sync_error_wraps_state_and_source() {
        let inner = Error::Transport("timed out".into());
        let wrapped = Error::Sync {
            state: "Reconciling",
            source: Box::new(inner),
        };
        assert_eq!(
            wrapped.to_string(),
            "sync error in state Reconciling: transport error: timed out"
        );
    }
}
