//! ALFA File Vault - Envelope Cipher
//!
//! Every file gets its own key: HKDF(master, nonce) with a fresh 256-bit nonce.
//! The nonce and algorithm id travel inside the stored blob:
//!
//! ```text
//! [MAGIC 8B]["ALFAFILE"]
//! [VERSION 1B][0x01]
//! [ALGORITHM 1B][0x01 AES-256-GCM | 0x02 XChaCha20-Poly1305]
//! [NONCE 32B][random, HKDF salt]
//! [CIPHERTEXT variable][AEAD ciphertext + 16B tag, AAD = all of the above]
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{
    aes_gcm_open, aes_gcm_seal, derive_file_material, generate_envelope_nonce, xchacha_open,
    xchacha_seal, MasterKey, ENVELOPE_NONCE_LEN, GCM_IV_LEN, TAG_LEN, XCHACHA_IV_LEN,
};
use crate::error::{VaultError, VaultResult};

/// Magic bytes identifying an ALFA encrypted file
pub const MAGIC: &[u8; 8] = b"ALFAFILE";

/// Current blob format version
pub const FORMAT_VERSION: u8 = 0x01;

/// Header size: MAGIC(8) + VERSION(1) + ALGORITHM(1) + NONCE(32)
pub const HEADER_LEN: usize = 8 + 1 + 1 + ENVELOPE_NONCE_LEN;

/// Cipher suite stored with every object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmId {
    /// AES-256-GCM, per-file key via HKDF-SHA256
    #[default]
    Aes256GcmHkdf,
    /// XChaCha20-Poly1305, per-file key via HKDF-SHA256
    XChaCha20Poly1305Hkdf,
}

impl AlgorithmId {
    pub fn as_u8(self) -> u8 {
        match self {
            AlgorithmId::Aes256GcmHkdf => 0x01,
            AlgorithmId::XChaCha20Poly1305Hkdf => 0x02,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AlgorithmId::Aes256GcmHkdf),
            0x02 => Some(AlgorithmId::XChaCha20Poly1305Hkdf),
            _ => None,
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            AlgorithmId::Aes256GcmHkdf => "AES-256-GCM (HKDF-SHA256)",
            AlgorithmId::XChaCha20Poly1305Hkdf => "XChaCha20-Poly1305 (HKDF-SHA256)",
        }
    }

    fn iv_len(self) -> usize {
        match self {
            AlgorithmId::Aes256GcmHkdf => GCM_IV_LEN,
            AlgorithmId::XChaCha20Poly1305Hkdf => XCHACHA_IV_LEN,
        }
    }
}

/// Ciphertext + nonce + algorithm. Immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedObject {
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    algorithm: AlgorithmId,
}

impl EncryptedObject {
    /// Reassemble from stored parts. Validation happens on decrypt.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: Vec<u8>, algorithm: AlgorithmId) -> Self {
        Self {
            ciphertext,
            nonce,
            algorithm,
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    /// Serialize to the stored blob layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 2 + self.nonce.len() + self.ciphertext.len());
        out.extend_from_slice(&header(self.algorithm, &self.nonce));
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a stored blob
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(VaultError::DecryptionFailed("Data too short".into()));
        }

        if &data[0..8] != MAGIC {
            return Err(VaultError::DecryptionFailed("Invalid magic bytes".into()));
        }

        if data[8] != FORMAT_VERSION {
            return Err(VaultError::DecryptionFailed(format!(
                "Unsupported format version: {}",
                data[8]
            )));
        }

        let algorithm = AlgorithmId::from_u8(data[9]).ok_or_else(|| {
            VaultError::DecryptionFailed(format!("Unknown algorithm id: {}", data[9]))
        })?;

        Ok(Self {
            nonce: data[10..HEADER_LEN].to_vec(),
            ciphertext: data[HEADER_LEN..].to_vec(),
            algorithm,
        })
    }

    /// Base64 text form for transport
    pub fn to_transport(&self) -> String {
        encode_transport(&self.to_bytes())
    }

    /// Parse the base64 text form
    pub fn from_transport(text: &str) -> VaultResult<Self> {
        Self::from_bytes(&decode_transport(text)?)
    }
}

impl fmt::Debug for EncryptedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedObject")
            .field("algorithm", &self.algorithm)
            .field("nonce", &hex::encode(&self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// True when the blob starts with the envelope magic
pub fn is_envelope(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
}

/// Binary-safe text encoding applied at the transport boundary
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_transport`]
pub fn decode_transport(text: &str) -> VaultResult<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

fn header(algorithm: AlgorithmId, nonce: &[u8]) -> Vec<u8> {
    let mut h = Vec::with_capacity(10 + nonce.len());
    h.extend_from_slice(MAGIC);
    h.push(FORMAT_VERSION);
    h.push(algorithm.as_u8());
    h.extend_from_slice(nonce);
    h
}

/// Envelope Cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCipher {
    algorithm: AlgorithmId,
}

impl EnvelopeCipher {
    /// Cipher that writes new objects with `algorithm`
    pub fn new(algorithm: AlgorithmId) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    /// Encrypt with a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8], master: &MasterKey) -> VaultResult<EncryptedObject> {
        self.encrypt_with_nonce(plaintext, master, generate_envelope_nonce())
    }

    /// Deterministic encryption for a caller-supplied nonce.
    ///
    /// The nonce must never repeat for the same master key; production code
    /// goes through [`EnvelopeCipher::encrypt`].
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        master: &MasterKey,
        nonce: [u8; ENVELOPE_NONCE_LEN],
    ) -> VaultResult<EncryptedObject> {
        let algorithm = self.algorithm;
        let material = derive_file_material(master, &nonce, algorithm.as_u8(), algorithm.iv_len())?;
        let aad = header(algorithm, &nonce);

        let ciphertext = match algorithm {
            AlgorithmId::Aes256GcmHkdf => aes_gcm_seal(&material.key, &material.iv, plaintext, &aad)?,
            AlgorithmId::XChaCha20Poly1305Hkdf => {
                xchacha_seal(&material.key, &material.iv, plaintext, &aad)?
            }
        };

        Ok(EncryptedObject {
            ciphertext,
            nonce: nonce.to_vec(),
            algorithm,
        })
    }

    /// Decrypt an object, whatever algorithm it was written with
    pub fn decrypt(&self, object: &EncryptedObject, master: &MasterKey) -> VaultResult<Vec<u8>> {
        let algorithm = object.algorithm;

        if object.ciphertext.len() < TAG_LEN {
            return Err(VaultError::DecryptionFailed("Ciphertext too short".into()));
        }

        let material = derive_file_material(master, &object.nonce, algorithm.as_u8(), algorithm.iv_len())?;
        let aad = header(algorithm, &object.nonce);

        match algorithm {
            AlgorithmId::Aes256GcmHkdf => aes_gcm_open(&material.key, &material.iv, &object.ciphertext, &aad),
            AlgorithmId::XChaCha20Poly1305Hkdf => {
                xchacha_open(&material.key, &material.iv, &object.ciphertext, &aad)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"0123456789".to_vec(),
            (0u8..=255).collect(),
            vec![0u8; 70_000],
        ]
    }

    #[test]
    fn test_roundtrip_both_algorithms() {
        let key = MasterKey::generate();
        for alg in [AlgorithmId::Aes256GcmHkdf, AlgorithmId::XChaCha20Poly1305Hkdf] {
            let cipher = EnvelopeCipher::new(alg);
            for p in payloads() {
                let obj = cipher.encrypt(&p, &key).unwrap();
                assert_eq!(obj.algorithm(), alg);
                assert_eq!(cipher.decrypt(&obj, &key).unwrap(), p);
            }
        }
    }

    #[test]
    fn test_key_isolation() {
        let k1 = MasterKey::generate();
        let k2 = MasterKey::generate();
        let cipher = EnvelopeCipher::default();

        let obj = cipher.encrypt(b"0123456789", &k1).unwrap();
        let result = cipher.decrypt(&obj, &k2);

        assert!(matches!(result, Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = MasterKey::generate();
        let cipher = EnvelopeCipher::default();

        let a = cipher.encrypt(b"same payload", &key).unwrap();
        let b = cipher.encrypt(b"same payload", &key).unwrap();

        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let key = MasterKey::new([5u8; 32]);
        let cipher = EnvelopeCipher::default();

        let a = cipher.encrypt_with_nonce(b"abc", &key, [1u8; 32]).unwrap();
        let b = cipher.encrypt_with_nonce(b"abc", &key, [1u8; 32]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_per_file_key_is_not_master_key() {
        // Sealing directly under the master key must not open the object
        let key = MasterKey::new([5u8; 32]);
        let obj = EnvelopeCipher::default()
            .encrypt_with_nonce(b"abc", &key, [1u8; 32])
            .unwrap();
        let iv = &obj.nonce()[..GCM_IV_LEN];
        let aad = header(obj.algorithm(), obj.nonce());
        assert!(aes_gcm_open(key.expose(), iv, obj.ciphertext(), &aad).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = MasterKey::generate();
        let cipher = EnvelopeCipher::default();
        let mut blob = cipher.encrypt(b"Secret file", &key).unwrap().to_bytes();

        blob[HEADER_LEN + 3] ^= 0xFF;
        let obj = EncryptedObject::from_bytes(&blob).unwrap();
        assert!(matches!(cipher.decrypt(&obj, &key), Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = MasterKey::generate();
        let cipher = EnvelopeCipher::default();
        let mut blob = cipher.encrypt(b"Secret file", &key).unwrap().to_bytes();

        blob[12] ^= 0x01;
        let obj = EncryptedObject::from_bytes(&blob).unwrap();
        assert!(cipher.decrypt(&obj, &key).is_err());
    }

    #[test]
    fn test_malformed_nonce_fails() {
        let key = MasterKey::generate();
        let cipher = EnvelopeCipher::default();
        let good = cipher.encrypt(b"payload", &key).unwrap();

        let bad = EncryptedObject::from_parts(
            good.ciphertext().to_vec(),
            good.nonce()[..16].to_vec(),
            good.algorithm(),
        );
        assert!(matches!(cipher.decrypt(&bad, &key), Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_algorithm_mismatch_fails() {
        let key = MasterKey::generate();
        let obj = EnvelopeCipher::new(AlgorithmId::Aes256GcmHkdf)
            .encrypt(b"payload", &key)
            .unwrap();

        let relabeled = EncryptedObject::from_parts(
            obj.ciphertext().to_vec(),
            obj.nonce().to_vec(),
            AlgorithmId::XChaCha20Poly1305Hkdf,
        );
        assert!(EnvelopeCipher::default().decrypt(&relabeled, &key).is_err());
    }

    #[test]
    fn test_legacy_algorithm_still_decrypts() {
        // Objects keep their own algorithm id after the default changes
        let key = MasterKey::generate();
        let old = EnvelopeCipher::new(AlgorithmId::XChaCha20Poly1305Hkdf)
            .encrypt(b"written before upgrade", &key)
            .unwrap();

        let current = EnvelopeCipher::new(AlgorithmId::Aes256GcmHkdf);
        assert_eq!(current.decrypt(&old, &key).unwrap(), b"written before upgrade");
    }

    #[test]
    fn test_blob_parsing_rejects_garbage() {
        assert!(EncryptedObject::from_bytes(b"short").is_err());

        let mut plain = vec![0u8; 100];
        plain[..8].copy_from_slice(b"NOTALFA!");
        assert!(!is_envelope(&plain));
        assert!(EncryptedObject::from_bytes(&plain).is_err());

        let key = MasterKey::generate();
        let mut blob = EnvelopeCipher::default().encrypt(b"x", &key).unwrap().to_bytes();
        blob[9] = 0x7F;
        assert!(matches!(
            EncryptedObject::from_bytes(&blob),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_transport_roundtrip() {
        let key = MasterKey::generate();
        let cipher = EnvelopeCipher::default();
        let obj = cipher.encrypt(&[0u8, 159, 146, 150, 255], &key).unwrap();

        let text = obj.to_transport();
        assert!(text.is_ascii());

        let back = EncryptedObject::from_transport(&text).unwrap();
        assert_eq!(back, obj);
        assert_eq!(cipher.decrypt(&back, &key).unwrap(), vec![0u8, 159, 146, 150, 255]);

        assert!(EncryptedObject::from_transport("%%% not base64").is_err());
    }
}
