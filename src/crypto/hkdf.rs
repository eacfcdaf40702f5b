//! ALFA File Vault - HKDF Key Derivation
//!
//! Per-file key material derived from (master key, nonce).

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{contexts, MasterKey, ENVELOPE_NONCE_LEN, KEY_LEN};
use crate::error::{VaultError, VaultResult};

/// Key and IV for a single file encryption
pub struct FileKeyMaterial {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub iv: Vec<u8>,
}

/// Derive a subkey from raw input keying material
pub fn derive_subkey(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> VaultResult<()> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))
}

/// Derive the per-file key and AEAD IV.
///
/// `algorithm` is mixed into the info string so the same nonce never yields
/// the same key under two different ciphers.
pub fn derive_file_material(
    master: &MasterKey,
    nonce: &[u8],
    algorithm: u8,
    iv_len: usize,
) -> VaultResult<FileKeyMaterial> {
    if nonce.len() != ENVELOPE_NONCE_LEN {
        return Err(VaultError::DecryptionFailed(format!(
            "malformed nonce: expected {} bytes, got {}",
            ENVELOPE_NONCE_LEN,
            nonce.len()
        )));
    }

    let mut info = Vec::with_capacity(contexts::FILE_KEY.len() + 1);
    info.extend_from_slice(contexts::FILE_KEY);
    info.push(algorithm);

    let mut okm = Zeroizing::new(vec![0u8; KEY_LEN + iv_len]);
    derive_subkey(master.expose(), nonce, &info, &mut okm)?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&okm[..KEY_LEN]);

    Ok(FileKeyMaterial {
        key,
        iv: okm[KEY_LEN..].to_vec(),
    })
}
