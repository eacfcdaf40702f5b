//! ALFA File Vault - KeyStore Adapter
//!
//! Secure storage seam for one master key entry per identity. The platform
//! keystore sits behind [`KeyStore`]; the crate ships an in-memory store
//! (tests, simulated hardware failures) and a file-backed store for the CLI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::identity_fingerprint;
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::SecureFs;

/// Prefix of every encryption key alias
pub const ALIAS_PREFIX: &str = "ek_";

/// Keystore alias for an identity: `ek_` + full SHA-256 fingerprint
pub fn alias_for_identity(user_id: &str) -> String {
    format!("{}{}", ALIAS_PREFIX, identity_fingerprint(user_id))
}

/// Per-item protection options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOptions {
    /// Item can only be read while the device is unlocked
    pub require_device_unlock: bool,
}

impl Default for ItemOptions {
    fn default() -> Self {
        Self {
            require_device_unlock: true,
        }
    }
}

/// Result of a conditional create
pub enum CreateOutcome {
    /// Our value was stored
    Created,
    /// Another writer got there first; this is their value
    Existing(SecretString),
}

impl std::fmt::Debug for CreateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateOutcome::Created => f.write_str("Created"),
            CreateOutcome::Existing(_) => f.write_str("Existing([REDACTED])"),
        }
    }
}

/// Secure key storage
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Store (or replace) an item
    async fn set_item(&self, alias: &str, value: &str, options: ItemOptions) -> VaultResult<()>;

    /// Fetch an item, `None` if absent
    async fn get_item(&self, alias: &str) -> VaultResult<Option<SecretString>>;

    /// Remove an item, returns whether it existed
    async fn delete_item(&self, alias: &str) -> VaultResult<bool>;

    /// Store only if no item exists under `alias`
    async fn create_if_absent(
        &self,
        alias: &str,
        value: &str,
        options: ItemOptions,
    ) -> VaultResult<CreateOutcome>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

struct MemoryItem {
    value: Zeroizing<String>,
    options: ItemOptions,
}

/// In-memory keystore.
///
/// Can simulate a device without secure hardware (`set_available(false)`)
/// and a declined device unlock prompt (`set_device_unlock(false)`).
pub struct MemoryKeyStore {
    items: Mutex<HashMap<String, MemoryItem>>,
    available: AtomicBool,
    device_unlocked: AtomicBool,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            device_unlocked: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_device_unlock(&self, granted: bool) {
        self.device_unlocked.store(granted, Ordering::SeqCst);
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> VaultResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VaultError::KeystoreUnavailable(
                "no secure key storage on this device".into(),
            ))
        }
    }

    fn check_unlock(&self, options: ItemOptions) -> VaultResult<()> {
        if options.require_device_unlock && !self.device_unlocked.load(Ordering::SeqCst) {
            Err(VaultError::KeystoreUnavailable("device unlock declined".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn set_item(&self, alias: &str, value: &str, options: ItemOptions) -> VaultResult<()> {
        self.check_available()?;
        self.check_unlock(options)?;

        self.items.lock().insert(
            alias.to_string(),
            MemoryItem {
                value: Zeroizing::new(value.to_string()),
                options,
            },
        );
        Ok(())
    }

    async fn get_item(&self, alias: &str) -> VaultResult<Option<SecretString>> {
        self.check_available()?;

        let items = self.items.lock();
        match items.get(alias) {
            Some(item) => {
                self.check_unlock(item.options)?;
                Ok(Some(SecretString::new(item.value.to_string())))
            }
            None => Ok(None),
        }
    }

    async fn delete_item(&self, alias: &str) -> VaultResult<bool> {
        self.check_available()?;
        Ok(self.items.lock().remove(alias).is_some())
    }

    async fn create_if_absent(
        &self,
        alias: &str,
        value: &str,
        options: ItemOptions,
    ) -> VaultResult<CreateOutcome> {
        self.check_available()?;

        let mut items = self.items.lock();
        if let Some(existing) = items.get(alias) {
            self.check_unlock(existing.options)?;
            return Ok(CreateOutcome::Existing(SecretString::new(
                existing.value.to_string(),
            )));
        }

        self.check_unlock(options)?;
        items.insert(
            alias.to_string(),
            MemoryItem {
                value: Zeroizing::new(value.to_string()),
                options,
            },
        );
        Ok(CreateOutcome::Created)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE-BACKED STORE
// ═══════════════════════════════════════════════════════════════════════════

/// On-disk entry format
#[derive(Serialize, Deserialize)]
struct FileEntry {
    options: ItemOptions,
    value: String,
}

impl Drop for FileEntry {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// File-backed keystore: one owner-only JSON file per alias under `keys/`.
///
/// Meant for desktop/CLI use where no hardware keystore exists.
pub struct FileKeyStore {
    fs: SecureFs,
}

impl FileKeyStore {
    pub fn new(root: &Path) -> Self {
        Self {
            fs: SecureFs::new(root),
        }
    }

    fn entry_path(alias: &str) -> VaultResult<String> {
        let valid = !alias.is_empty()
            && alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(VaultError::InvalidInput(format!("invalid key alias: {}", alias)));
        }
        Ok(format!("keys/{}.key", alias))
    }

    fn encode(value: &str, options: ItemOptions) -> VaultResult<Zeroizing<Vec<u8>>> {
        let entry = FileEntry {
            options,
            value: value.to_string(),
        };
        Ok(Zeroizing::new(serde_json::to_vec(&entry)?))
    }

    fn decode(bytes: &[u8]) -> VaultResult<SecretString> {
        let entry: FileEntry = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::KeystoreUnavailable(format!("corrupt key entry: {}", e)))?;
        Ok(SecretString::new(entry.value.clone()))
    }

    fn read_entry(&self, path: &str) -> VaultResult<Option<SecretString>> {
        match self.fs.read_file(path) {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                Self::decode(&bytes).map(Some)
            }
            Err(VaultError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(keystore_io(e)),
        }
    }
}

fn keystore_io(e: VaultError) -> VaultError {
    match e {
        VaultError::IoError(io) => VaultError::KeystoreUnavailable(io.to_string()),
        other => other,
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn set_item(&self, alias: &str, value: &str, options: ItemOptions) -> VaultResult<()> {
        let path = Self::entry_path(alias)?;
        let data = Self::encode(value, options)?;
        self.fs.write_file(&path, &data).map_err(keystore_io)
    }

    async fn get_item(&self, alias: &str) -> VaultResult<Option<SecretString>> {
        let path = Self::entry_path(alias)?;
        self.read_entry(&path)
    }

    async fn delete_item(&self, alias: &str) -> VaultResult<bool> {
        let path = Self::entry_path(alias)?;
        self.fs.delete_file(&path).map_err(keystore_io)
    }

    async fn create_if_absent(
        &self,
        alias: &str,
        value: &str,
        options: ItemOptions,
    ) -> VaultResult<CreateOutcome> {
        let path = Self::entry_path(alias)?;
        let data = Self::encode(value, options)?;

        if self.fs.write_new(&path, &data).map_err(keystore_io)? {
            return Ok(CreateOutcome::Created);
        }

        match self.read_entry(&path)? {
            Some(existing) => Ok(CreateOutcome::Existing(existing)),
            None => Err(VaultError::KeystoreUnavailable(
                "key entry vanished during create".into(),
            )),
        }
    }
}
