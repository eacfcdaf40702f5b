//! ALFA File Vault - Account Authentication
//!
//! Account collaborator seam (create / sign in / re-verify PIN), registration
//! form checks, and the single re-authentication primitive shared by the
//! access gate and the session unlock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DenialReason, VaultError, VaultResult};

/// Authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Account service collaborator
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Create an account and return its identity
    async fn create_account(&self, username: &str, pin: &str) -> VaultResult<Identity>;

    /// Sign in. Unknown account and wrong PIN fail identically.
    async fn authenticate(&self, username: &str, pin: &str) -> VaultResult<Identity>;

    /// Re-check the account credential of an existing identity.
    ///
    /// `Ok(false)` is a wrong credential; `Err` is a collaborator failure.
    async fn verify_credential(&self, identity: &Identity, pin: &str) -> VaultResult<bool>;
}

/// Re-authenticate the active identity.
///
/// Used for both the per-action PIN challenge and unlocking a locked session.
pub async fn reauthenticate(auth: &dyn AuthService, identity: &Identity, pin: &str) -> VaultResult<()> {
    if pin.is_empty() {
        return Err(VaultError::AccessDenied(DenialReason::WrongCredential));
    }

    if auth.verify_credential(identity, pin).await? {
        Ok(())
    } else {
        log::debug!("Re-authentication failed for {}", identity.user_id);
        Err(VaultError::AccessDenied(DenialReason::WrongCredential))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRATION FORM
// ═══════════════════════════════════════════════════════════════════════════

/// Sign-up form input
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub pin: String,
    pub confirm_pin: String,
}

impl Registration {
    pub fn new(username: &str, pin: &str, confirm_pin: &str) -> Self {
        Self {
            username: username.trim().to_string(),
            pin: pin.to_string(),
            confirm_pin: confirm_pin.to_string(),
        }
    }

    /// Check the form before any account or key is created
    pub fn validate(&self, min_pin_len: usize) -> VaultResult<()> {
        if !looks_like_email(&self.username) {
            return Err(VaultError::InvalidInput("enter a valid email address".into()));
        }
        if self.pin.chars().count() < min_pin_len {
            return Err(VaultError::InvalidInput(format!(
                "PIN must be at least {} characters",
                min_pin_len
            )));
        }
        if self.pin != self.confirm_pin {
            return Err(VaultError::InvalidInput("PINs do not match".into()));
        }
        Ok(())
    }
}

fn looks_like_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCAL ACCOUNT SERVICE
// ═══════════════════════════════════════════════════════════════════════════

/// Argon2id cost parameters for PIN hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PinHashParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl PinHashParams {
    /// Cheap parameters for tests
    pub fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn hasher(&self) -> VaultResult<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| VaultError::Config(format!("Invalid Argon2 params: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    user_id: String,
    username: String,
    pin_hash: String,
    created_at: DateTime<Utc>,
}

impl Account {
    fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
        }
    }
}

/// Local account service: Argon2id PHC hashes, optionally persisted to JSON
pub struct LocalAuthService {
    accounts: RwLock<HashMap<String, Account>>,
    path: Option<PathBuf>,
    params: PinHashParams,
    /// Hash checked for unknown accounts so they cost as much as a wrong PIN
    decoy_hash: OnceLock<String>,
}

impl LocalAuthService {
    /// In-memory service
    pub fn new(params: PinHashParams) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            path: None,
            params,
            decoy_hash: OnceLock::new(),
        }
    }

    /// Service persisted at `path` (loaded if it exists)
    pub fn open(path: &Path, params: PinHashParams) -> VaultResult<Self> {
        let accounts = if path.exists() {
            let data = std::fs::read(path)?;
            serde_json::from_slice(&data)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            accounts: RwLock::new(accounts),
            path: Some(path.to_path_buf()),
            params,
            decoy_hash: OnceLock::new(),
        })
    }

    fn persist(&self, accounts: &HashMap<String, Account>) -> VaultResult<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, serde_json::to_vec_pretty(accounts)?)?;
            std::fs::rename(&tmp, path)?;
        }
        Ok(())
    }

    fn hash_pin(&self, pin: &str) -> VaultResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.params
            .hasher()?
            .hash_password(pin.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))
    }

    fn check_pin(&self, pin: &str, phc: &str) -> VaultResult<bool> {
        let parsed = PasswordHash::new(phc)
            .map_err(|e| VaultError::SerializationError(format!("bad PIN hash: {}", e)))?;
        Ok(self
            .params
            .hasher()?
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok())
    }

    fn decoy_hash(&self) -> VaultResult<&str> {
        if let Some(hash) = self.decoy_hash.get() {
            return Ok(hash);
        }
        let hash = self.hash_pin(&Uuid::new_v4().to_string())?;
        Ok(self.decoy_hash.get_or_init(|| hash))
    }

    /// Run a full Argon2 verification that never succeeds
    fn burn_verification(&self, pin: &str) -> VaultResult<()> {
        let decoy = self.decoy_hash()?;
        self.check_pin(pin, decoy)?;
        Ok(())
    }

    fn normalize(username: &str) -> String {
        username.trim().to_lowercase()
    }
}

#[async_trait]
impl AuthService for LocalAuthService {
    async fn create_account(&self, username: &str, pin: &str) -> VaultResult<Identity> {
        let key = Self::normalize(username);
        if self.accounts.read().contains_key(&key) {
            return Err(VaultError::InvalidInput("an account with this email already exists".into()));
        }

        let pin_hash = self.hash_pin(pin)?;

        let mut accounts = self.accounts.write();
        if accounts.contains_key(&key) {
            return Err(VaultError::InvalidInput("an account with this email already exists".into()));
        }

        let account = Account {
            user_id: Uuid::new_v4().to_string(),
            username: username.trim().to_string(),
            pin_hash,
            created_at: Utc::now(),
        };
        let identity = account.identity();
        accounts.insert(key, account);
        self.persist(&accounts)?;

        log::info!("Account created: {}", identity.user_id);
        Ok(identity)
    }

    async fn authenticate(&self, username: &str, pin: &str) -> VaultResult<Identity> {
        let account = self.accounts.read().get(&Self::normalize(username)).cloned();

        match account {
            Some(account) if self.check_pin(pin, &account.pin_hash)? => Ok(account.identity()),
            Some(_) => Err(VaultError::AccessDenied(DenialReason::WrongCredential)),
            None => {
                self.burn_verification(pin)?;
                Err(VaultError::AccessDenied(DenialReason::WrongCredential))
            }
        }
    }

    async fn verify_credential(&self, identity: &Identity, pin: &str) -> VaultResult<bool> {
        let account = self
            .accounts
            .read()
            .values()
            .find(|a| a.user_id == identity.user_id)
            .cloned();

        match account {
            Some(account) => self.check_pin(pin, &account.pin_hash),
            None => {
                self.burn_verification(pin)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service() -> LocalAuthService {
        LocalAuthService::new(PinHashParams::light())
    }

    #[test]
    fn test_registration_validation() {
        assert!(Registration::new("a@b.com", "123456", "123456").validate(6).is_ok());
        assert!(Registration::new("not-an-email", "123456", "123456").validate(6).is_err());
        assert!(Registration::new("a@b", "123456", "123456").validate(6).is_err());
        assert!(Registration::new("a@b.com", "12345", "12345").validate(6).is_err());
        assert!(Registration::new("a@b.com", "123456", "654321").validate(6).is_err());
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let auth = service();
        let id = auth.create_account("User@Example.com", "0123456789").await.unwrap();

        let again = auth.authenticate("user@example.com", "0123456789").await.unwrap();
        assert_eq!(id, again);

        assert!(auth.verify_credential(&id, "0123456789").await.unwrap());
        assert!(!auth.verify_credential(&id, "9999999999").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let auth = service();
        auth.create_account("a@b.com", "123456").await.unwrap();
        assert!(matches!(
            auth.create_account("A@B.com", "654321").await,
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_account_same_error_as_wrong_pin() {
        let auth = service();
        auth.create_account("a@b.com", "123456").await.unwrap();

        let wrong_pin = auth.authenticate("a@b.com", "000000").await.unwrap_err();
        let unknown = auth.authenticate("x@y.com", "123456").await.unwrap_err();

        assert!(wrong_pin.is_wrong_credential());
        assert!(unknown.is_wrong_credential());
        assert_eq!(wrong_pin.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_unknown_account_still_runs_argon2() {
        let auth = service();
        assert!(auth.decoy_hash.get().is_none());

        let err = auth.authenticate("nobody@example.com", "123456").await.unwrap_err();
        assert!(err.is_wrong_credential());

        let decoy = auth.decoy_hash.get().cloned().unwrap();
        assert!(decoy.starts_with("$argon2id$"));

        // Reused, not regenerated per attempt
        auth.authenticate("other@example.com", "654321").await.unwrap_err();
        assert_eq!(auth.decoy_hash.get(), Some(&decoy));
    }

    #[tokio::test]
    async fn test_reauthenticate() {
        let auth = service();
        let id = auth.create_account("a@b.com", "123456").await.unwrap();

        assert!(reauthenticate(&auth, &id, "123456").await.is_ok());
        assert!(reauthenticate(&auth, &id, "").await.unwrap_err().is_wrong_credential());
        assert!(reauthenticate(&auth, &id, "123457").await.unwrap_err().is_wrong_credential());
    }

    #[tokio::test]
    async fn test_persisted_accounts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let id = {
            let auth = LocalAuthService::open(&path, PinHashParams::light()).unwrap();
            auth.create_account("a@b.com", "s3cret-pin").await.unwrap()
        };

        let reopened = LocalAuthService::open(&path, PinHashParams::light()).unwrap();
        assert_eq!(reopened.authenticate("a@b.com", "s3cret-pin").await.unwrap(), id);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret-pin"));
    }
}
