//! # ALFA File Vault
//!
//! Personal encrypted-file vault: per-file envelope encryption, PIN-gated
//! access to every sensitive action, and an inactivity lock.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ALFA FILE VAULT                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ ACCESS GATE  │──▶│  KEY MANAGER │──▶│   ENVELOPE   │  │
//! │  │ PIN per file │   │ ensure/regen │   │ HKDF + AEAD  │  │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘  │
//! │         │                  │                  │          │
//! │  ┌──────┴───────┐   ┌──────┴───────┐   ┌──────┴───────┐  │
//! │  │ INACTIVITY   │   │   KEYSTORE   │   │   STORAGE    │  │
//! │  │ LOCK         │   │ ek_<sha256>  │   │ objects + db │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - One 256-bit master key per identity, kept in the keystore
//! - Per-file key = HKDF-SHA256(master, fresh 256-bit nonce)
//! - AES-256-GCM (default) or XChaCha20-Poly1305, header authenticated
//! - PIN (or enrolled device biometric) re-authentication before every
//!   upload, view and delete
//! - Zero plaintext in storage; decrypted content zeroized on drop

pub mod auth;
pub mod config;
pub mod crypto;
pub mod device_auth;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod key_manager;
pub mod keystore;
pub mod lock;
pub mod migration;
pub mod secure_fs;
pub mod session;
pub mod storage;
pub mod vault;

pub use auth::{AuthService, Identity, LocalAuthService, Registration};
pub use config::VaultConfig;
pub use device_auth::{DeviceAuth, DeviceAuthenticator, ScriptedDeviceAuthenticator};
pub use envelope::{AlgorithmId, EncryptedObject, EnvelopeCipher};
pub use error::{DenialReason, VaultError, VaultResult};
pub use gate::{AccessGate, ActionKind, UploadRequest};
pub use key_manager::{KeyInfo, KeyLifecycleManager};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use lock::{InactivityLock, LockPhase};
pub use migration::{migrate_legacy_files, MigrationReport};
pub use session::{spawn_lock_watchdog, SessionContext};
pub use storage::{FileRecord, LocalStorage, MemoryStorage, StorageService};
pub use vault::{ActionOutcome, DecryptedFile, FileVault};

/// ALFA File Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// ALFA File Vault signature
pub const SIGNATURE: &str = "ALFA_FILE_VAULT_v1";
