//! ALFA File Vault - Vault Service
//!
//! Wires user actions through the access gate, the key lifecycle manager,
//! the envelope cipher and the storage collaborator. Plaintext only exists in
//! memory: on the way in until it is encrypted, on the way out inside a
//! [`DecryptedFile`] that zeroizes on drop.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::auth::{reauthenticate, AuthService, Identity, LocalAuthService, Registration};
use crate::config::VaultConfig;
use crate::device_auth::{DeviceAuth, DeviceAuthenticator};
use crate::envelope::{encode_transport, is_envelope, EncryptedObject, EnvelopeCipher};
use crate::error::{DenialReason, VaultError, VaultResult};
use crate::gate::{ActionKind, PendingAction, UploadRequest};
use crate::key_manager::{KeyInfo, KeyLifecycleManager};
use crate::keystore::{FileKeyStore, ItemOptions, KeyStore};
use crate::lock::{Clock, SystemClock};
use crate::session::SessionContext;
use crate::storage::{FileRecord, LocalStorage, NewFileRecord, StorageService};

/// Result of a granted action
#[derive(Debug)]
pub enum ActionOutcome {
    Uploaded(FileRecord),
    Viewed(DecryptedFile),
    Deleted(FileRecord),
}

/// Decrypted file content, zeroized on drop
pub struct DecryptedFile {
    pub record: FileRecord,
    content: Zeroizing<Vec<u8>>,
}

impl DecryptedFile {
    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    /// Base64 form for a display/transport layer
    pub fn to_transport(&self) -> String {
        encode_transport(&self.content)
    }

    /// Text preview for text-like files
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        let textual = self.record.mime_type.starts_with("text/")
            || self.record.mime_type == "application/json";
        if !textual {
            return None;
        }
        Some(String::from_utf8_lossy(&self.content).chars().take(max_chars).collect())
    }
}

impl fmt::Debug for DecryptedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedFile")
            .field("record", &self.record)
            .field("size", &self.content.len())
            .finish()
    }
}

/// File Vault - Main entry point
pub struct FileVault {
    config: VaultConfig,
    keys: KeyLifecycleManager,
    cipher: EnvelopeCipher,
    auth: Arc<dyn AuthService>,
    storage: Arc<dyn StorageService>,
    keystore: Arc<dyn KeyStore>,
    device: Option<DeviceAuth>,
    clock: Arc<dyn Clock>,
}

impl FileVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn new(
        config: VaultConfig,
        keystore: Arc<dyn KeyStore>,
        auth: Arc<dyn AuthService>,
        storage: Arc<dyn StorageService>,
    ) -> VaultResult<Self> {
        config.validate()?;
        let options = ItemOptions {
            require_device_unlock: config.require_device_unlock,
        };

        Ok(Self {
            keys: KeyLifecycleManager::new(Arc::clone(&keystore), options),
            cipher: EnvelopeCipher::new(config.algorithm),
            auth,
            storage,
            keystore,
            device: None,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Vault backed by the local data directory (file keystore, JSON
    /// accounts, SQLite records)
    pub fn open_local(config: VaultConfig) -> VaultResult<Self> {
        let root = config.data_dir.clone();
        std::fs::create_dir_all(&root)?;

        let keystore = Arc::new(FileKeyStore::new(&root));
        let auth = Arc::new(LocalAuthService::open(&root.join("accounts.json"), config.pin_hash)?);
        let storage = Arc::new(LocalStorage::open(&root)?);

        log::debug!("Opened local vault at {}", root.display());
        Self::new(config, keystore, auth, storage)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Offer the platform authenticator as an alternate credential
    pub fn with_device_authenticator(mut self, authenticator: Arc<dyn DeviceAuthenticator>) -> Self {
        let options = ItemOptions {
            require_device_unlock: self.config.require_device_unlock,
        };
        self.device = Some(DeviceAuth::new(authenticator, Arc::clone(&self.keystore), options));
        self
    }

    fn device(&self) -> VaultResult<&DeviceAuth> {
        self.device
            .as_ref()
            .ok_or_else(|| VaultError::Unsupported("no device authenticator on this platform".into()))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyLifecycleManager {
        &self.keys
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.storage
    }

    pub(crate) fn cipher(&self) -> &EnvelopeCipher {
        &self.cipher
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCOUNT / SESSION
    // ═══════════════════════════════════════════════════════════════════════

    fn start_session(&self, identity: Identity) -> Arc<SessionContext> {
        log::info!("Session started for {}", identity.user_id);
        Arc::new(SessionContext::new(
            identity,
            Arc::clone(&self.clock),
            self.config.timeout_minutes,
        ))
    }

    /// Create an account and its encryption key, then sign in
    pub async fn register(&self, form: &Registration) -> VaultResult<Arc<SessionContext>> {
        form.validate(self.config.min_pin_length)?;

        let identity = self.auth.create_account(&form.username, &form.pin).await?;
        let key = self.keys.ensure_key(&identity.user_id).await?;
        log::info!("Registered {} with key {}", identity.user_id, key.fingerprint());

        Ok(self.start_session(identity))
    }

    pub async fn sign_in(&self, username: &str, pin: &str) -> VaultResult<Arc<SessionContext>> {
        let identity = self.auth.authenticate(username, pin).await?;
        Ok(self.start_session(identity))
    }

    pub fn sign_out(&self, session: &SessionContext) {
        session.end();
    }

    /// Unlock a locked session with the account PIN
    pub async fn unlock(&self, session: &SessionContext, pin: &str) -> VaultResult<()> {
        session.unlock(self.auth.as_ref(), pin).await
    }

    /// Unlock a locked session through the device prompt
    pub async fn unlock_with_device(&self, session: &SessionContext) -> VaultResult<()> {
        session.unlock_with_device(self.device()?).await
    }

    /// Lock the session now
    pub fn lock(&self, session: &SessionContext) {
        session.lock_now();
    }

    /// Enable fingerprint / face unlock. Requires the PIN and an encryption
    /// key on this device.
    pub async fn enable_device_auth(&self, session: &SessionContext, pin: &str) -> VaultResult<()> {
        session.ensure_active()?;
        let device = self.device()?;
        reauthenticate(self.auth.as_ref(), session.identity(), pin).await?;
        self.keys.ensure_key(session.user_id()).await?;
        device.enable(session.identity()).await
    }

    pub async fn disable_device_auth(&self, session: &SessionContext) -> VaultResult<bool> {
        session.ensure_active()?;
        self.device()?.disable(session.identity()).await
    }

    pub async fn device_auth_enabled(&self, session: &SessionContext) -> VaultResult<bool> {
        match &self.device {
            Some(device) => device.is_enabled(session.identity()).await,
            None => Ok(false),
        }
    }

    /// Change the auto-lock timeout for this session
    pub fn set_auto_lock(&self, session: &SessionContext, minutes: u32) -> VaultResult<()> {
        session.ensure_active()?;
        session.lock().set_timeout_minutes(minutes)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FILE ACTIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Owner's files, newest first (metadata only, no PIN needed)
    pub async fn list_files(&self, session: &SessionContext) -> VaultResult<Vec<FileRecord>> {
        session.ensure_active()?;
        self.storage.list_records(session.user_id()).await
    }

    /// Look up one of the owner's records by id
    pub async fn find_file(&self, session: &SessionContext, id: &str) -> VaultResult<FileRecord> {
        session.ensure_active()?;
        self.stored_record(session, id).await
    }

    /// The record as storage has it, owned by the session identity.
    ///
    /// Caller-supplied records are only used for their id.
    async fn stored_record(&self, session: &SessionContext, id: &str) -> VaultResult<FileRecord> {
        match self.storage.get_record(id).await? {
            Some(record) if record.owner_id == session.user_id() => Ok(record),
            Some(record) => {
                log::warn!("{} tried to access file {} of another owner", session.user_id(), record.id);
                Err(VaultError::AccessDenied(DenialReason::NotOwner))
            }
            None => Err(VaultError::FileNotFound(id.to_string())),
        }
    }

    pub fn request_upload(&self, session: &SessionContext, upload: UploadRequest) -> VaultResult<u64> {
        if upload.file_name.trim().is_empty() {
            return Err(VaultError::InvalidInput("file name is empty".into()));
        }
        session.ensure_active()?;
        session.gate().request_action(ActionKind::Upload, None, Some(upload))
    }

    pub async fn request_view(&self, session: &SessionContext, record: &FileRecord) -> VaultResult<u64> {
        let stored = self.find_file(session, &record.id).await?;
        session.gate().request_action(ActionKind::View, Some(stored), None)
    }

    pub async fn request_delete(&self, session: &SessionContext, record: &FileRecord) -> VaultResult<u64> {
        let stored = self.find_file(session, &record.id).await?;
        session.gate().request_action(ActionKind::Delete, Some(stored), None)
    }

    /// Answer the live PIN challenge and run the granted action
    pub async fn submit_pin(&self, session: &SessionContext, pin: &str) -> VaultResult<ActionOutcome> {
        session.ensure_active()?;
        let granted = session.gate().submit_credential(self.auth.as_ref(), pin).await;
        self.run_granted(session, granted).await
    }

    /// Answer the live challenge with the device prompt
    pub async fn submit_device(&self, session: &SessionContext) -> VaultResult<ActionOutcome> {
        session.ensure_active()?;
        let granted = session.gate().submit_device(self.device()?).await;
        self.run_granted(session, granted).await
    }

    async fn run_granted(
        &self,
        session: &SessionContext,
        granted: VaultResult<PendingAction>,
    ) -> VaultResult<ActionOutcome> {
        let result = match granted {
            Ok(action) => self.dispatch(session, action).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if e.is_security_critical() {
                log::warn!("Security event for {}: {}", session.user_id(), e);
            }
        }
        result
    }

    /// Cancel the live PIN challenge
    pub fn dismiss_challenge(&self, session: &SessionContext) -> bool {
        session.gate().cancel(crate::gate::CancelReason::Dismissed)
    }

    async fn dispatch(&self, session: &SessionContext, action: PendingAction) -> VaultResult<ActionOutcome> {
        match (action.kind, action.target, action.upload) {
            (ActionKind::Upload, _, Some(upload)) => self.upload(session, upload).await.map(ActionOutcome::Uploaded),
            (ActionKind::View, Some(target), _) => {
                let record = self.stored_record(session, &target.id).await?;
                self.view(session, record).await.map(ActionOutcome::Viewed)
            }
            (ActionKind::Delete, Some(target), _) => {
                let record = self.stored_record(session, &target.id).await?;
                self.delete(session, record).await.map(ActionOutcome::Deleted)
            }
            _ => Err(VaultError::NoPendingAction),
        }
    }

    async fn upload(&self, session: &SessionContext, upload: UploadRequest) -> VaultResult<FileRecord> {
        let owner = session.user_id();
        let mime_type = upload
            .mime_type
            .clone()
            .unwrap_or_else(|| detect_mime(&upload.file_name, &upload.content));

        let blob = {
            let key = self.keys.ensure_key(owner).await?;
            self.cipher.encrypt(&upload.content, &key)?.to_bytes()
        };

        let path = self.storage.put_object(owner, &upload.file_name, &blob).await?;

        let inserted = self
            .storage
            .insert_record(NewFileRecord {
                owner_id: owner.to_string(),
                storage_path: path.clone(),
                file_name: upload.file_name.clone(),
                mime_type,
                size: upload.content.len() as u64,
                is_encrypted: true,
                created_at: None,
            })
            .await;

        match inserted {
            Ok(record) => {
                log::info!("Uploaded file {} ({} bytes)", record.id, record.size);
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_object(&path).await {
                    log::warn!("Orphaned object {} after failed insert: {}", path, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn view(&self, session: &SessionContext, record: FileRecord) -> VaultResult<DecryptedFile> {
        let guard = session.render_guard()?;

        let blob = self.storage.get_object(&record.storage_path).await?;
        if !record.is_encrypted || !is_envelope(&blob) {
            return Err(VaultError::DecryptionFailed(
                "legacy unencrypted file, run migration first".into(),
            ));
        }

        let object = EncryptedObject::from_bytes(&blob)?;
        let content = {
            let key = self.keys.load_key(session.user_id()).await?;
            Zeroizing::new(self.cipher.decrypt(&object, &key)?)
        };

        // A lock during the decrypt discards the result
        session.confirm_render(&guard)?;

        log::debug!("Decrypted file {} for display", record.id);
        Ok(DecryptedFile { record, content })
    }

    async fn delete(&self, session: &SessionContext, record: FileRecord) -> VaultResult<FileRecord> {
        if !self.storage.delete_object(&record.storage_path).await? {
            log::warn!("Object for file {} was already gone", record.id);
        }
        self.storage.delete_record(session.user_id(), &record.id).await?;

        log::info!("Deleted file {}", record.id);
        Ok(record)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // KEY MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════

    /// Metadata of the session owner's key
    pub async fn key_status(&self, session: &SessionContext) -> VaultResult<Option<KeyInfo>> {
        session.ensure_active()?;
        self.keys.key_info(session.user_id()).await
    }

    /// Replace the encryption key. Files encrypted with the old key become
    /// unreadable; requires the PIN and an explicit confirmation.
    pub async fn regenerate_key(&self, session: &SessionContext, pin: &str, confirmed: bool) -> VaultResult<KeyInfo> {
        self.check_destructive(session, pin, confirmed).await?;
        self.keys.regenerate_key(session.user_id()).await?;
        self.keys
            .key_info(session.user_id())
            .await?
            .ok_or_else(|| VaultError::KeyNotFound(session.user_id().to_string()))
    }

    /// Delete the encryption key permanently
    pub async fn destroy_key(&self, session: &SessionContext, pin: &str, confirmed: bool) -> VaultResult<bool> {
        self.check_destructive(session, pin, confirmed).await?;
        self.keys.destroy_key(session.user_id()).await
    }

    pub async fn backup_key(&self, session: &SessionContext) -> VaultResult<()> {
        session.ensure_active()?;
        self.keys.backup_key(session.user_id()).await
    }

    async fn check_destructive(&self, session: &SessionContext, pin: &str, confirmed: bool) -> VaultResult<()> {
        session.ensure_active()?;
        if !confirmed {
            return Err(VaultError::InvalidInput(
                "this permanently makes existing files unreadable; confirmation required".into(),
            ));
        }
        reauthenticate(self.auth.as_ref(), session.identity(), pin).await
    }
}

/// MIME type from the file name, falling back to magic bytes
pub fn detect_mime(file_name: &str, data: &[u8]) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();

    let by_ext = match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "txt" | "md" | "log" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "mp4" => Some("video/mp4"),
        "mp3" => Some("audio/mpeg"),
        "zip" => Some("application/zip"),
        "doc" => Some("application/msword"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        _ => None,
    };
    if let Some(mime) = by_ext {
        return mime.into();
    }

    match data {
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf".into(),
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg".into(),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => "image/png".into(),
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif".into(),
        [0x50, 0x4B, 0x03, 0x04, ..] => "application/zip".into(),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp".into(),
        _ => "application/octet-stream".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::auth::PinHashParams;
    use crate::keystore::MemoryKeyStore;
    use crate::lock::ManualClock;
    use crate::storage::MemoryStorage;

    struct Fixture {
        vault: FileVault,
        keystore: Arc<MemoryKeyStore>,
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let keystore = Arc::new(MemoryKeyStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let auth = Arc::new(LocalAuthService::new(PinHashParams::light()));
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let vault = FileVault::new(VaultConfig::default(), keystore.clone(), auth, storage.clone())
            .unwrap()
            .with_clock(clock.clone());

        Fixture {
            vault,
            keystore,
            storage,
            clock,
        }
    }

    async fn register(vault: &FileVault, email: &str) -> Arc<SessionContext> {
        vault
            .register(&Registration::new(email, "0123456789", "0123456789"))
            .await
            .unwrap()
    }

    async fn upload(vault: &FileVault, session: &SessionContext, name: &str, data: &[u8]) -> FileRecord {
        vault
            .request_upload(session, UploadRequest::new(name, data.to_vec()))
            .unwrap();
        match vault.submit_pin(session, "0123456789").await.unwrap() {
            ActionOutcome::Uploaded(record) => record,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        assert!(f.vault.keys().has_key(session.user_id()).await.unwrap());

        let record = upload(&f.vault, &session, "note.txt", b"0123456789").await;
        assert!(record.is_encrypted);
        assert_eq!(record.size, 10);
        assert_eq!(record.mime_type, "text/plain");

        // Stored bytes are not the plaintext
        let stored = f.storage.get_object(&record.storage_path).await.unwrap();
        assert!(is_envelope(&stored));
        assert!(!stored.windows(10).any(|w| w == b"0123456789"));

        // Idle past the timeout, then come back
        f.clock.advance_minutes(6);
        assert!(session.tick());
        assert!(matches!(
            f.vault.request_view(&session, &record).await,
            Err(VaultError::VaultLocked)
        ));

        f.vault.unlock(&session, "0123456789").await.unwrap();
        f.vault.request_view(&session, &record).await.unwrap();
        match f.vault.submit_pin(&session, "0123456789").await.unwrap() {
            ActionOutcome::Viewed(file) => {
                assert_eq!(file.bytes(), b"0123456789");
                assert_eq!(file.preview(4).as_deref(), Some("0123"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_pin_never_decrypts() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let record = upload(&f.vault, &session, "a.bin", &[1, 2, 3]).await;

        f.vault.request_view(&session, &record).await.unwrap();
        let err = f.vault.submit_pin(&session, "1111111111").await.unwrap_err();
        assert!(err.is_wrong_credential());
        assert_eq!(err.user_message(), "Incorrect PIN. Please try again.");

        // Challenge consumed
        assert!(matches!(
            f.vault.submit_pin(&session, "0123456789").await,
            Err(VaultError::NoPendingAction)
        ));
    }

    #[tokio::test]
    async fn test_other_owner_denied() {
        let f = fixture();
        let alice = register(&f.vault, "alice@example.com").await;
        let bob = register(&f.vault, "bob@example.com").await;

        let record = upload(&f.vault, &alice, "private.txt", b"alice only").await;

        let err = f.vault.request_view(&bob, &record).await.unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied(DenialReason::NotOwner)));
        assert!(f.vault.list_files(&bob).await.unwrap().is_empty());
        assert!(matches!(
            f.vault.find_file(&bob, &record.id).await,
            Err(VaultError::AccessDenied(DenialReason::NotOwner))
        ));
    }

    #[tokio::test]
    async fn test_forged_record_cannot_delete_foreign_file() {
        let f = fixture();
        let alice = register(&f.vault, "alice@example.com").await;
        let bob = register(&f.vault, "bob@example.com").await;
        let record = upload(&f.vault, &alice, "secret.txt", b"alice only").await;

        let mut forged = record.clone();
        forged.owner_id = bob.user_id().to_string();

        let err = f.vault.request_delete(&bob, &forged).await.unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied(DenialReason::NotOwner)));
        assert!(matches!(
            f.vault.submit_pin(&bob, "0123456789").await,
            Err(VaultError::NoPendingAction)
        ));

        assert_eq!(f.vault.list_files(&alice).await.unwrap().len(), 1);
        assert!(f.storage.get_object(&record.storage_path).await.is_ok());
    }

    #[tokio::test]
    async fn test_forged_record_cannot_view_foreign_file() {
        let f = fixture();
        let alice = register(&f.vault, "alice@example.com").await;
        let bob = register(&f.vault, "bob@example.com").await;
        let alice_file = upload(&f.vault, &alice, "secret.txt", b"alice only").await;
        let bob_file = upload(&f.vault, &bob, "mine.txt", b"bob data").await;

        // Bob's own id, Alice's object path: only the stored path is used
        let mut forged = bob_file.clone();
        forged.storage_path = alice_file.storage_path.clone();

        f.vault.request_view(&bob, &forged).await.unwrap();
        match f.vault.submit_pin(&bob, "0123456789").await.unwrap() {
            ActionOutcome::Viewed(file) => {
                assert_eq!(file.bytes(), b"bob data");
                assert_eq!(file.record.storage_path, bob_file.storage_path);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_removed_before_grant() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let record = upload(&f.vault, &session, "a.txt", b"x").await;

        f.vault.request_view(&session, &record).await.unwrap();
        assert!(f.storage.delete_record(session.user_id(), &record.id).await.unwrap());

        assert!(matches!(
            f.vault.submit_pin(&session, "0123456789").await,
            Err(VaultError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_auto_lock() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;

        f.vault.set_auto_lock(&session, 1).unwrap();
        assert_eq!(session.lock().snapshot().timeout_minutes, 1);
        assert!(f.vault.set_auto_lock(&session, 100_000).is_err());

        f.clock.advance_minutes(1);
        assert!(session.tick());
        assert!(matches!(f.vault.set_auto_lock(&session, 5), Err(VaultError::VaultLocked)));

        f.vault.unlock(&session, "0123456789").await.unwrap();
        f.vault.set_auto_lock(&session, 0).unwrap();
        f.clock.advance_minutes(600);
        assert!(!session.tick());
    }

    #[tokio::test]
    async fn test_dismiss_challenge() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        assert!(!f.vault.dismiss_challenge(&session));

        f.vault
            .request_upload(&session, UploadRequest::new("a.txt", b"x".to_vec()))
            .unwrap();
        assert!(f.vault.dismiss_challenge(&session));
        assert!(matches!(
            f.vault.submit_pin(&session, "0123456789").await,
            Err(VaultError::NoPendingAction)
        ));
        assert_eq!(f.storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_device_auth_grants_actions_and_unlocks() {
        use crate::device_auth::ScriptedDeviceAuthenticator;

        let prompt = Arc::new(ScriptedDeviceAuthenticator::new());
        let f = fixture();
        let vault = f.vault.with_device_authenticator(prompt.clone());
        let session = register(&vault, "u1@example.com").await;
        let record = upload(&vault, &session, "a.txt", b"by fingerprint").await;

        assert!(!vault.device_auth_enabled(&session).await.unwrap());
        assert!(vault.enable_device_auth(&session, "bad-pin").await.is_err());
        vault.enable_device_auth(&session, "0123456789").await.unwrap();
        assert!(vault.device_auth_enabled(&session).await.unwrap());

        vault.request_view(&session, &record).await.unwrap();
        match vault.submit_device(&session).await.unwrap() {
            ActionOutcome::Viewed(file) => assert_eq!(file.bytes(), b"by fingerprint"),
            other => panic!("unexpected outcome {:?}", other),
        }

        vault.lock(&session);
        vault.unlock_with_device(&session).await.unwrap();
        assert!(session.ensure_active().is_ok());

        assert!(vault.disable_device_auth(&session).await.unwrap());
        vault.request_delete(&session, &record).await.unwrap();
        assert!(matches!(
            vault.submit_device(&session).await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_device_auth_unsupported_without_authenticator() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        assert!(!f.vault.device_auth_enabled(&session).await.unwrap());
        assert!(matches!(
            f.vault.enable_device_auth(&session, "0123456789").await,
            Err(VaultError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_object_and_record() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let record = upload(&f.vault, &session, "a.txt", b"bye").await;
        assert_eq!(f.storage.object_count(), 1);

        f.vault.request_delete(&session, &record).await.unwrap();
        let outcome = f.vault.submit_pin(&session, "0123456789").await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Deleted(ref r) if r.id == record.id));

        assert_eq!(f.storage.object_count(), 0);
        assert!(f.vault.list_files(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let first = upload(&f.vault, &session, "1.txt", b"1").await;
        let second = upload(&f.vault, &session, "2.txt", b"2").await;

        let listed = f.vault.list_files(&session).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_storage_outage_is_retryable() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;

        f.vault
            .request_upload(&session, UploadRequest::new("a.txt", b"x".to_vec()))
            .unwrap();
        f.storage.set_online(false);

        let err = f.vault.submit_pin(&session, "0123456789").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "Network error. Please try again.");
    }

    #[tokio::test]
    async fn test_keystore_unavailable_blocks_upload() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        f.keystore.set_device_unlock(false);

        f.vault
            .request_upload(&session, UploadRequest::new("a.txt", b"x".to_vec()))
            .unwrap();
        let err = f.vault.submit_pin(&session, "0123456789").await.unwrap_err();
        assert!(matches!(err, VaultError::KeystoreUnavailable(_)));
        assert_eq!(f.storage.object_count(), 0);
    }

    #[tokio::test]
    async fn test_regenerate_key_makes_old_files_unreadable() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let record = upload(&f.vault, &session, "a.txt", b"old key data").await;
        let before = f.vault.key_status(&session).await.unwrap().unwrap();

        assert!(f.vault.regenerate_key(&session, "0123456789", false).await.is_err());
        assert!(f.vault.regenerate_key(&session, "bad-pin", true).await.is_err());

        let after = f.vault.regenerate_key(&session, "0123456789", true).await.unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);

        f.vault.request_view(&session, &record).await.unwrap();
        let err = f.vault.submit_pin(&session, "0123456789").await.unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed(_)));
        assert_ne!(err.user_message(), VaultError::AccessDenied(DenialReason::WrongCredential).user_message());
    }

    #[tokio::test]
    async fn test_view_without_key_reports_missing_key() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        let record = upload(&f.vault, &session, "a.txt", b"data").await;

        assert!(f.vault.destroy_key(&session, "0123456789", true).await.unwrap());

        f.vault.request_view(&session, &record).await.unwrap();
        let err = f.vault.submit_pin(&session, "0123456789").await.unwrap_err();
        assert!(matches!(err, VaultError::KeyNotFound(_)));
        assert!(!f.vault.keys().has_key(session.user_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_sign_out_ends_session() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        f.vault
            .request_upload(&session, UploadRequest::new("a.txt", b"x".to_vec()))
            .unwrap();

        f.vault.sign_out(&session);
        assert!(matches!(
            f.vault.submit_pin(&session, "0123456789").await,
            Err(VaultError::SessionEnded)
        ));
        assert!(matches!(
            f.vault.unlock(&session, "0123456789").await,
            Err(VaultError::SessionEnded)
        ));

        let again = f.vault.sign_in("u1@example.com", "0123456789").await.unwrap();
        assert_eq!(again.user_id(), session.user_id());
        assert!(f.vault.list_files(&again).await.is_ok());
    }

    #[tokio::test]
    async fn test_registration_validation_creates_nothing() {
        let f = fixture();
        let err = f
            .vault
            .register(&Registration::new("u1@example.com", "123", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
        assert!(f.keystore.is_empty());
    }

    #[tokio::test]
    async fn test_backup_unsupported() {
        let f = fixture();
        let session = register(&f.vault, "u1@example.com").await;
        assert!(matches!(f.vault.backup_key(&session).await, Err(VaultError::Unsupported(_))));
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime("report.PDF", b""), "application/pdf");
        assert_eq!(detect_mime("noext", &[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(detect_mime("noext", b"%PDF-1.7"), "application/pdf");
        assert_eq!(detect_mime("blob", &[0, 1, 2]), "application/octet-stream");
    }
}
