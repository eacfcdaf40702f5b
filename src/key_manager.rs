//! ALFA File Vault - Key Lifecycle Manager
//!
//! Generates, persists, checks, destroys and regenerates the per-identity
//! master key. `ensure_key` is idempotent: concurrent callers for the same
//! identity always end up with one and the same key.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::keystore::{alias_for_identity, CreateOutcome, ItemOptions, KeyStore};

/// Stored key entry version
const STORED_KEY_VERSION: u8 = 1;

/// Algorithm the master key is meant for
pub const KEY_ALGORITHM: &str = "AES-256";

/// Keystore value: JSON with the base64 key and its metadata
#[derive(Serialize, Deserialize)]
struct StoredKey {
    version: u8,
    key: String,
    algorithm: String,
    created_at: DateTime<Utc>,
}

impl StoredKey {
    fn new(key: &MasterKey) -> Self {
        Self {
            version: STORED_KEY_VERSION,
            key: STANDARD.encode(key.expose()),
            algorithm: KEY_ALGORITHM.to_string(),
            created_at: Utc::now(),
        }
    }

    fn parse(value: &SecretString) -> VaultResult<Self> {
        let stored: StoredKey = serde_json::from_str(value.expose_secret())
            .map_err(|_| VaultError::KeystoreUnavailable("corrupt key entry".into()))?;

        if stored.version != STORED_KEY_VERSION {
            return Err(VaultError::KeystoreUnavailable(format!(
                "unsupported key entry version {}",
                stored.version
            )));
        }
        Ok(stored)
    }

    fn master_key(&self) -> VaultResult<MasterKey> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(&self.key)
                .map_err(|_| VaultError::KeystoreUnavailable("corrupt key entry".into()))?,
        );
        MasterKey::from_slice(&bytes)
    }
}

impl Drop for StoredKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Public metadata about a stored key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub alias: String,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    /// Short key fingerprint, safe to display
    pub fingerprint: String,
}

/// Key Lifecycle Manager
pub struct KeyLifecycleManager {
    store: Arc<dyn KeyStore>,
    options: ItemOptions,
    creation_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLifecycleManager {
    pub fn new(store: Arc<dyn KeyStore>, options: ItemOptions) -> Self {
        Self {
            store,
            options,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    fn creation_lock(&self, alias: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.creation_locks.lock();
        Arc::clone(
            locks
                .entry(alias.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn alias(user_id: &str) -> VaultResult<String> {
        if user_id.trim().is_empty() {
            return Err(VaultError::InvalidInput("empty user id".into()));
        }
        Ok(alias_for_identity(user_id))
    }

    /// Store a brand-new key unless one appeared meanwhile
    async fn create_key(&self, alias: &str) -> VaultResult<MasterKey> {
        let key = MasterKey::generate();
        let value = Zeroizing::new(serde_json::to_string(&StoredKey::new(&key))?);

        match self.store.create_if_absent(alias, &value, self.options).await? {
            CreateOutcome::Created => {
                log::info!("Created encryption key {} ({}…)", key.fingerprint(), &alias[..11]);
                Ok(key)
            }
            CreateOutcome::Existing(existing) => {
                log::debug!("Key for {}… created concurrently, adopting it", &alias[..11]);
                StoredKey::parse(&existing)?.master_key()
            }
        }
    }

    /// Return the identity's key, creating and persisting one if absent
    pub async fn ensure_key(&self, user_id: &str) -> VaultResult<MasterKey> {
        let alias = Self::alias(user_id)?;

        if let Some(value) = self.store.get_item(&alias).await? {
            return StoredKey::parse(&value)?.master_key();
        }

        let lock = self.creation_lock(&alias);
        let _guard = lock.lock().await;

        // Another task may have finished while we waited
        if let Some(value) = self.store.get_item(&alias).await? {
            return StoredKey::parse(&value)?.master_key();
        }

        self.create_key(&alias).await
    }

    /// Read-only fetch; never creates
    pub async fn load_key(&self, user_id: &str) -> VaultResult<MasterKey> {
        let alias = Self::alias(user_id)?;
        match self.store.get_item(&alias).await? {
            Some(value) => StoredKey::parse(&value)?.master_key(),
            None => Err(VaultError::KeyNotFound(format!("{}…", &alias[..11]))),
        }
    }

    /// Whether a key exists for the identity
    pub async fn has_key(&self, user_id: &str) -> VaultResult<bool> {
        let alias = Self::alias(user_id)?;
        Ok(self.store.get_item(&alias).await?.is_some())
    }

    /// Irreversibly delete the identity's key.
    ///
    /// Every file encrypted under it becomes undecryptable.
    pub async fn destroy_key(&self, user_id: &str) -> VaultResult<bool> {
        let alias = Self::alias(user_id)?;
        let lock = self.creation_lock(&alias);
        let _guard = lock.lock().await;

        let existed = self.store.delete_item(&alias).await?;
        if existed {
            log::warn!("Encryption key destroyed ({}…)", &alias[..11]);
        }
        Ok(existed)
    }

    /// Destroy the current key and create a fresh one
    pub async fn regenerate_key(&self, user_id: &str) -> VaultResult<MasterKey> {
        let alias = Self::alias(user_id)?;
        let lock = self.creation_lock(&alias);
        let _guard = lock.lock().await;

        self.store.delete_item(&alias).await?;
        let key = self.create_key(&alias).await?;
        log::warn!("Encryption key regenerated, new fingerprint {}", key.fingerprint());
        Ok(key)
    }

    /// Key metadata (never the key itself)
    pub async fn key_info(&self, user_id: &str) -> VaultResult<Option<KeyInfo>> {
        let alias = Self::alias(user_id)?;
        let value = match self.store.get_item(&alias).await? {
            Some(v) => v,
            None => return Ok(None),
        };

        let stored = StoredKey::parse(&value)?;
        let fingerprint = stored.master_key()?.fingerprint();
        Ok(Some(KeyInfo {
            alias,
            created_at: stored.created_at,
            algorithm: stored.algorithm.clone(),
            fingerprint,
        }))
    }

    /// Cloud key backup is not offered
    pub async fn backup_key(&self, _user_id: &str) -> VaultResult<()> {
        Err(VaultError::Unsupported("encryption key backup is not available".into()))
    }
}
