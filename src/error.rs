//! ALFA File Vault - Error Types

use std::fmt;

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Why an access was refused.
///
/// Never rendered to the user beyond "Access denied"; callers use it to pick
/// the right message (wrong PIN vs. not your file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// PIN / account credential did not verify
    WrongCredential,
    /// File belongs to another identity
    NotOwner,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::WrongCredential => f.write_str("wrong credential"),
            DenialReason::NotOwner => f.write_str("not owner"),
        }
    }
}

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // KEYSTORE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Secure key storage unavailable: {0}")]
    KeystoreUnavailable(String),

    #[error("Encryption key not found for identity {0}")]
    KeyNotFound(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ═══════════════════════════════════════════════════════════════
    // ACCESS ERRORS
    // ═══════════════════════════════════════════════════════════════

    /// The reason is deliberately kept out of the message.
    #[error("Access denied")]
    AccessDenied(DenialReason),

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Session has ended - sign in again")]
    SessionEnded,

    #[error("No action is waiting for a PIN")]
    NoPendingAction,

    #[error("PIN challenge was replaced or cancelled")]
    ChallengeSuperseded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // MISC
    // ═══════════════════════════════════════════════════════════════

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Only collaborator (network/storage) failures are worth retrying.
    /// A failed decrypt or keystore error never gets better by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::StorageUnavailable(_))
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed(_)
                | VaultError::AccessDenied(_)
                | VaultError::KeystoreUnavailable(_)
        )
    }

    /// Wrong PIN specifically (as opposed to any other denial)
    pub fn is_wrong_credential(&self) -> bool {
        matches!(self, VaultError::AccessDenied(DenialReason::WrongCredential))
    }

    /// Message safe to show to the user.
    ///
    /// Wrong PIN, undecryptable file and network trouble must read
    /// differently; none of them leaks internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            VaultError::AccessDenied(DenialReason::WrongCredential) => "Incorrect PIN. Please try again.",
            VaultError::AccessDenied(DenialReason::NotOwner) => "You do not have access to this file.",
            VaultError::DecryptionFailed(_) => "This file cannot be decrypted with your current key.",
            VaultError::KeyNotFound(_) => "No encryption key found on this device.",
            VaultError::KeystoreUnavailable(_) => {
                "Secure storage is unavailable. Unlock your device and try again."
            }
            VaultError::StorageUnavailable(_) => "Network error. Please try again.",
            VaultError::VaultLocked => "The vault is locked. Enter your PIN to continue.",
            VaultError::SessionEnded => "You have been signed out.",
            VaultError::ChallengeSuperseded | VaultError::NoPendingAction => {
                "This request is no longer active."
            }
            VaultError::InvalidInput(_) => "Please check the entered details.",
            VaultError::FileNotFound(_) => "The file no longer exists.",
            _ => "Something went wrong.",
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::DecryptionFailed(format!("invalid transport encoding: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_hides_reason() {
        let e = VaultError::AccessDenied(DenialReason::NotOwner);
        assert_eq!(e.to_string(), "Access denied");
        let e = VaultError::AccessDenied(DenialReason::WrongCredential);
        assert_eq!(e.to_string(), "Access denied");
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let wrong_pin = VaultError::AccessDenied(DenialReason::WrongCredential).user_message();
        let undecryptable = VaultError::DecryptionFailed("tag".into()).user_message();
        let network = VaultError::StorageUnavailable("timeout".into()).user_message();

        assert_ne!(wrong_pin, undecryptable);
        assert_ne!(wrong_pin, network);
        assert_ne!(undecryptable, network);
    }

    #[test]
    fn test_only_storage_is_retryable() {
        assert!(VaultError::StorageUnavailable("x".into()).is_retryable());
        assert!(!VaultError::DecryptionFailed("x".into()).is_retryable());
        assert!(!VaultError::KeystoreUnavailable("x".into()).is_retryable());
        assert!(!VaultError::AccessDenied(DenialReason::WrongCredential).is_retryable());
    }
}
