//! ALFA File Vault - AEAD Primitives
//!
//! AES-256-GCM (default) and XChaCha20-Poly1305, both with associated data.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::keys::{GCM_IV_LEN, KEY_LEN, XCHACHA_IV_LEN};
use crate::error::{VaultError, VaultResult};

/// Authentication tag length (both ciphers)
pub const TAG_LEN: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with AES-256-GCM
pub fn aes_gcm_seal(key: &[u8; KEY_LEN], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
    if iv.len() != GCM_IV_LEN {
        return Err(VaultError::EncryptionFailed("Invalid IV length".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| VaultError::EncryptionFailed("AES-GCM seal failed".into()))
}

/// Decrypt with AES-256-GCM
pub fn aes_gcm_open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
    if iv.len() != GCM_IV_LEN {
        return Err(VaultError::DecryptionFailed("Invalid IV length".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
}

// ═══════════════════════════════════════════════════════════════════════════
// XChaCha20-Poly1305
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with XChaCha20-Poly1305
pub fn xchacha_seal(key: &[u8; KEY_LEN], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
    if iv.len() != XCHACHA_IV_LEN {
        return Err(VaultError::EncryptionFailed("Invalid IV length".into()));
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    cipher
        .encrypt(XNonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| VaultError::EncryptionFailed("XChaCha20 seal failed".into()))
}

/// Decrypt with XChaCha20-Poly1305
pub fn xchacha_open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
    if iv.len() != XCHACHA_IV_LEN {
        return Err(VaultError::DecryptionFailed("Invalid IV length".into()));
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(XNonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];

    #[test]
    fn test_aes_gcm_roundtrip() {
        let iv = [1u8; GCM_IV_LEN];
        let sealed = aes_gcm_seal(&KEY, &iv, b"ALFA secret document", b"hdr").unwrap();
        assert_eq!(sealed.len(), 20 + TAG_LEN);

        let opened = aes_gcm_open(&KEY, &iv, &sealed, b"hdr").unwrap();
        assert_eq!(opened, b"ALFA secret document");
    }

    #[test]
    fn test_xchacha_roundtrip() {
        let iv = [2u8; XCHACHA_IV_LEN];
        let sealed = xchacha_seal(&KEY, &iv, b"index", b"").unwrap();
        let opened = xchacha_open(&KEY, &iv, &sealed, b"").unwrap();
        assert_eq!(opened, b"index");
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = [1u8; GCM_IV_LEN];
        let sealed = aes_gcm_seal(&KEY, &iv, b"Secret data", b"").unwrap();
        let result = aes_gcm_open(&[0x43; KEY_LEN], &iv, &sealed, b"");
        assert!(matches!(result, Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let iv = [3u8; XCHACHA_IV_LEN];
        let sealed = xchacha_seal(&KEY, &iv, b"Secret data", b"header-a").unwrap();
        assert!(xchacha_open(&KEY, &iv, &sealed, b"header-b").is_err());
    }

    #[test]
    fn test_iv_length_checked() {
        assert!(aes_gcm_seal(&KEY, &[0u8; 24], b"x", b"").is_err());
        assert!(xchacha_open(&KEY, &[0u8; 12], &[0u8; 32], b"").is_err());
    }
}
