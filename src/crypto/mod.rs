//! ALFA File Vault - Cryptographic Core
//!
//! Key material, HKDF derivation and AEAD primitives used by the envelope cipher.

pub mod keys;
pub mod aead;
pub mod hkdf;

pub use self::keys::*;
pub use self::aead::*;
pub use self::hkdf::*;
