use std::path::{Path, PathBuf};

use enroll_crypto::signal::ProvisioningConfig;
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;

/// Runtime configuration, read from a JSON file.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollConfig {
    /// SQLite path for the account database. `":memory:"` keeps it private
    /// to the process.
    pub database_path: PathBuf,
    pub provisioning: ProvisioningConfig,
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("enroll.db"),
            provisioning: ProvisioningConfig::default(),
        }
    }
}

impl EnrollConfig {
    pub fn load(path: &Path) -> Result<Self, RegistrationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RegistrationError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistrationError> {
        serde_json::from_str(raw).map_err(|e| RegistrationError::Config(e.to_string()))
    }
}
