//! The crypto box (C3): password-derived AES-256-GCM encryption of the
//! local cache.
//!
//! Grounded on the RustCrypto `aes-gcm`/`OsRng`/`Nonce` idiom used by the
//! sync module of `examples/other_examples/8dcf99ee_KestrelAS-ghost-auth__src-tauri-src-sync.rs.rs`;
//! unlike that file (which derives a session key from a human-readable
//! pairing code via HMAC), key derivation here goes through PBKDF2 per
//! the spec's explicit algorithm choice.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::codec;
use crate::error::{Error, Result};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// The on-disk form of an encrypted blob: `{salt, iv, text}`, all
/// lowercase hex, as specified by §4.3. This is what gets canonically
/// serialized into `K-data`/`K-sync` by the local cache (C4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherObject {
    pub salt: String,
    pub iv: String,
    pub text: String,
}

impl CipherObject {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "salt": self.salt,
            "iv": self.iv,
            "text": self.text,
        })
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let field = |name: &str| -> Result<String> {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Crypto(format!("cipher object missing field: {name}")))
        };
        Ok(CipherObject {
            salt: field("salt")?,
            iv: field("iv")?,
            text: field("text")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = codec::parse(bytes)?;
        Self::from_json(&value)
    }
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt `plaintext` under a key derived from `password`. A fresh
/// random salt and IV are generated on every call (§4.3).
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<CipherObject> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let key_bytes = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    Ok(CipherObject {
        salt: hex::encode(salt),
        iv: hex::encode(iv),
        text: hex::encode(ciphertext),
    })
}

/// Decrypt a [`CipherObject`] produced by [`encrypt`] under `password`.
/// Fails with `CryptoError` on malformed hex, wrong key, or an
/// authentication-tag mismatch.
pub fn decrypt(object: &CipherObject, password: &str) -> Result<Vec<u8>> {
    let salt = hex::decode(&object.salt)
        .map_err(|e| Error::Crypto(format!("malformed salt: {e}")))?;
    let iv = hex::decode(&object.iv).map_err(|e| Error::Crypto(format!("malformed iv: {e}")))?;
    let ciphertext =
        hex::decode(&object.text).map_err(|e| Error::Crypto(format!("malformed ciphertext: {e}")))?;

    if iv.len() != IV_LEN {
        return Err(Error::Crypto(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }

    let key_bytes = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&iv);

    cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| Error::Crypto("authentication failed: wrong password or corrupt data".into()))
}
