//! The hasher (C2): a thin, swappable wrapper around the hash algorithm
//! the sync protocol's safety rests on.
//!
//! Only SHA-256 is wired up today, but callers go through [`Algorithm`]
//! rather than calling `sha2` directly so a future algorithm bump is one
//! match arm, not a grep-and-replace across the crate.

use sha2::{Digest, Sha256};

/// A hash algorithm the protocol can be parameterized over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Sha256,
}

impl Algorithm {
    /// Hex digest length this algorithm produces.
    pub const fn digest_len(self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
        }
    }
}

/// Hash `bytes` under `algo`, returning a lowercase hex digest.
pub fn hash(bytes: &[u8], algo: Algorithm) -> String {
    match algo {
        Algorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            hex::encode(digest)
        }
    }
}

/// `hash` under the default algorithm (SHA-256).
pub fn hash_default(bytes: &[u8]) -> String {
    hash(bytes, Algorithm::default())
}

/// Whether `candidate` looks like a well-formed digest for `algo`: the
/// right length and all-lowercase-hex. Used by the sync engine to reject
/// malformed remote hashes before trusting them as equal/unequal.
pub fn is_well_formed(candidate: &str, algo: Algorithm) -> bool {
    candidate.len() == algo.digest_len()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
