//! ALFA File Vault - Key Material
//!
//! Master key wrapper and nonce generation.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256 / XChaCha20
pub const KEY_LEN: usize = 32;

/// Envelope nonce length (256 bits, used as HKDF salt)
pub const ENVELOPE_NONCE_LEN: usize = 32;

/// IV length for AES-GCM
pub const GCM_IV_LEN: usize = 12;

/// IV length for XChaCha20
pub const XCHACHA_IV_LEN: usize = 24;

/// HKDF contexts for key derivation
pub mod contexts {
    /// Per-file key derivation
    pub const FILE_KEY: &[u8] = b"ALFA:FILE:v1";

    /// Identity fingerprint used for keystore aliases
    pub const IDENTITY: &[u8] = b"ALFA:IDENTITY:v1";

    /// Public key fingerprint (logs / key info screen)
    pub const FINGERPRINT: &[u8] = b"ALFA:KEYPRINT:v1";
}

/// Per-identity master key.
///
/// Only ever lives for the duration of one file operation; zeroized on drop.
pub struct MasterKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl MasterKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Build from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| VaultError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self::new(array))
    }

    /// Generate a random key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Short, non-reversible identifier of this key (16 hex chars).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(contexts::FINGERPRINT);
        hasher.update(self.expose());
        hex::encode(&hasher.finalize()[..8])
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Generate a fresh envelope nonce
pub fn generate_envelope_nonce() -> [u8; ENVELOPE_NONCE_LEN] {
    let mut nonce = [0u8; ENVELOPE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Stable, fixed-length fingerprint of a user identity (64 hex chars).
pub fn identity_fingerprint(user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contexts::IDENTITY);
    hasher.update(user_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let k1 = MasterKey::generate();
        let k2 = MasterKey::generate();
        assert_ne!(k1.expose(), k2.expose());
        assert_ne!(k1.fingerprint(), k2.fingerprint());
    }

    #[test]
    fn test_from_slice_rejects_short_key() {
        let err = MasterKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, VaultError::InvalidKeyLength { expected: 32, actual: 16 }));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MasterKey::new([0xAB; KEY_LEN]);
        let dbg = format!("{:?}", key);
        assert!(!dbg.to_lowercase().contains("abab"));
    }

    #[test]
    fn test_identity_fingerprint_is_full_length() {
        // Same 8-char prefix must not collide
        let a = identity_fingerprint("user1234-aaaa");
        let b = identity_fingerprint("user1234-bbbb");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, identity_fingerprint("user1234-aaaa"));
    }
}
