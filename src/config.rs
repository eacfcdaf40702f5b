//! ALFA File Vault - Configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::PinHashParams;
use crate::envelope::AlgorithmId;
use crate::error::{VaultError, VaultResult};
use crate::lock::MAX_TIMEOUT_MINUTES;

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Auto-lock after this many idle minutes (0 = never)
    pub timeout_minutes: u32,
    /// How often the lock watchdog checks the timeout
    pub watchdog_interval_secs: u64,
    /// Algorithm for newly written files
    pub algorithm: AlgorithmId,
    /// Minimum PIN length at registration
    pub min_pin_length: usize,
    /// Keystore items need an unlocked device
    pub require_device_unlock: bool,
    /// Local data directory (keys, objects, database)
    pub data_dir: PathBuf,
    /// Argon2id cost for PIN hashes
    pub pin_hash: PinHashParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 5,
            watchdog_interval_secs: 15,
            algorithm: AlgorithmId::default(),
            min_pin_length: 6,
            require_device_unlock: true,
            data_dir: PathBuf::from("./alfa_vault"),
            pin_hash: PinHashParams::default(),
        }
    }
}

impl VaultConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> VaultResult<Self> {
        let data = std::fs::read(path)?;
        let config: VaultConfig = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load if present, defaults otherwise
    pub fn load_or_default(path: &Path) -> VaultResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.timeout_minutes > MAX_TIMEOUT_MINUTES {
            return Err(VaultError::Config(format!(
                "timeout_minutes must be at most {}",
                MAX_TIMEOUT_MINUTES
            )));
        }
        if self.watchdog_interval_secs == 0 {
            return Err(VaultError::Config("watchdog_interval_secs must be positive".into()));
        }
        if self.min_pin_length < 4 {
            return Err(VaultError::Config("min_pin_length must be at least 4".into()));
        }
        if self.pin_hash.memory_kib < 8 * self.pin_hash.parallelism
            || self.pin_hash.iterations == 0
            || self.pin_hash.parallelism == 0
        {
            return Err(VaultError::Config("invalid pin_hash parameters".into()));
        }
        Ok(())
    }
}
