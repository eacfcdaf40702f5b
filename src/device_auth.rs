//! ALFA File Vault - Device Authentication
//!
//! Fingerprint / face unlock as an alternate credential for the PIN
//! challenge and for unlocking a locked session. The platform prompt sits
//! behind [`DeviceAuthenticator`]; the per-user "enabled" flag lives in the
//! keystore next to the encryption key.
//!
//! Device auth is only offered when keystore items require device unlock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::Identity;
use crate::crypto::identity_fingerprint;
use crate::error::{DenialReason, VaultError, VaultResult};
use crate::keystore::{ItemOptions, KeyStore};

/// Prompt shown by the platform authenticator
pub const PROMPT: &str = "Authenticate to access your vault";

/// Prefix of the per-user enabled flag in the keystore
const FLAG_PREFIX: &str = "da_";

const FLAG_VALUE: &str = "enabled";

/// Platform authenticator
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    /// Hardware present and something enrolled
    async fn is_available(&self) -> VaultResult<bool>;

    /// Show the prompt. `Ok(false)` means the user failed or declined.
    async fn authenticate(&self, prompt: &str) -> VaultResult<bool>;
}

/// Scripted authenticator for tests and headless runs
#[derive(Debug)]
pub struct ScriptedDeviceAuthenticator {
    available: AtomicBool,
    approve: AtomicBool,
    prompts: AtomicUsize,
}

impl Default for ScriptedDeviceAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDeviceAuthenticator {
    /// Available and approving
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            approve: AtomicBool::new(true),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_approve(&self, approve: bool) {
        self.approve.store(approve, Ordering::SeqCst);
    }

    /// Number of prompts shown so far
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceAuthenticator for ScriptedDeviceAuthenticator {
    async fn is_available(&self) -> VaultResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn authenticate(&self, _prompt: &str) -> VaultResult<bool> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(VaultError::Unsupported("device authentication unavailable".into()));
        }
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.approve.load(Ordering::SeqCst))
    }
}

/// Device authentication with per-user opt-in
pub struct DeviceAuth {
    authenticator: Arc<dyn DeviceAuthenticator>,
    store: Arc<dyn KeyStore>,
    options: ItemOptions,
}

impl DeviceAuth {
    pub fn new(authenticator: Arc<dyn DeviceAuthenticator>, store: Arc<dyn KeyStore>, options: ItemOptions) -> Self {
        Self {
            authenticator,
            store,
            options,
        }
    }

    fn flag_alias(user_id: &str) -> String {
        format!("{}{}", FLAG_PREFIX, identity_fingerprint(user_id))
    }

    /// Turn device auth on for an identity.
    ///
    /// Fails when keystore items do not require device unlock, or when the
    /// device has no usable authenticator.
    pub async fn enable(&self, identity: &Identity) -> VaultResult<()> {
        if !self.options.require_device_unlock {
            return Err(VaultError::Unsupported(
                "device authentication needs keys bound to device unlock".into(),
            ));
        }
        if !self.authenticator.is_available().await? {
            return Err(VaultError::Unsupported(
                "no biometric hardware or nothing enrolled on this device".into(),
            ));
        }

        // Enrolment itself must pass the prompt once
        if !self.authenticator.authenticate(PROMPT).await? {
            return Err(VaultError::AccessDenied(DenialReason::WrongCredential));
        }

        self.store
            .set_item(&Self::flag_alias(&identity.user_id), FLAG_VALUE, self.options)
            .await?;
        log::info!("Device authentication enabled for {}", identity.user_id);
        Ok(())
    }

    /// Turn device auth off. Returns whether it was on.
    pub async fn disable(&self, identity: &Identity) -> VaultResult<bool> {
        let was_on = self
            .store
            .delete_item(&Self::flag_alias(&identity.user_id))
            .await?;
        if was_on {
            log::info!("Device authentication disabled for {}", identity.user_id);
        }
        Ok(was_on)
    }

    pub async fn is_enabled(&self, identity: &Identity) -> VaultResult<bool> {
        if !self.options.require_device_unlock {
            return Ok(false);
        }
        Ok(self
            .store
            .get_item(&Self::flag_alias(&identity.user_id))
            .await?
            .is_some())
    }

    /// Re-authenticate the identity through the device prompt.
    ///
    /// A failed prompt is a wrong credential, like a wrong PIN.
    pub async fn reauthenticate(&self, identity: &Identity) -> VaultResult<()> {
        if !self.is_enabled(identity).await? {
            return Err(VaultError::InvalidInput(
                "device authentication is not enabled for this account".into(),
            ));
        }

        if self.authenticator.authenticate(PROMPT).await? {
            Ok(())
        } else {
            log::debug!("Device re-authentication failed for {}", identity.user_id);
            Err(VaultError::AccessDenied(DenialReason::WrongCredential))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    fn identity() -> Identity {
        Identity {
            user_id: "u1".into(),
            username: "u1@example.com".into(),
        }
    }

    fn setup(options: ItemOptions) -> (Arc<ScriptedDeviceAuthenticator>, Arc<MemoryKeyStore>, DeviceAuth) {
        let device = Arc::new(ScriptedDeviceAuthenticator::new());
        let store = Arc::new(MemoryKeyStore::new());
        let auth = DeviceAuth::new(device.clone(), store.clone(), options);
        (device, store, auth)
    }

    #[tokio::test]
    async fn test_enable_then_reauthenticate() {
        let (device, store, auth) = setup(ItemOptions::default());
        let id = identity();

        assert!(!auth.is_enabled(&id).await.unwrap());
        assert!(auth.reauthenticate(&id).await.is_err());

        auth.enable(&id).await.unwrap();
        assert!(auth.is_enabled(&id).await.unwrap());
        assert_eq!(store.len(), 1);

        auth.reauthenticate(&id).await.unwrap();
        assert_eq!(device.prompts(), 2);

        device.set_approve(false);
        assert!(auth.reauthenticate(&id).await.unwrap_err().is_wrong_credential());
    }

    #[tokio::test]
    async fn test_requires_device_bound_keys() {
        let (_, store, auth) = setup(ItemOptions {
            require_device_unlock: false,
        });
        assert!(matches!(auth.enable(&identity()).await, Err(VaultError::Unsupported(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_hardware() {
        let (device, _, auth) = setup(ItemOptions::default());
        device.set_available(false);
        assert!(matches!(auth.enable(&identity()).await, Err(VaultError::Unsupported(_))));
        assert_eq!(device.prompts(), 0);
    }

    #[tokio::test]
    async fn test_declined_enrolment_stores_nothing() {
        let (device, store, auth) = setup(ItemOptions::default());
        device.set_approve(false);
        assert!(auth.enable(&identity()).await.unwrap_err().is_wrong_credential());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disable() {
        let (_, _, auth) = setup(ItemOptions::default());
        let id = identity();
        auth.enable(&id).await.unwrap();

        assert!(auth.disable(&id).await.unwrap());
        assert!(!auth.disable(&id).await.unwrap());
        assert!(!auth.is_enabled(&id).await.unwrap());
    }
}
