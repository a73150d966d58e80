use enroll_crypto::signal::PreKeyCollections;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::profile_key::ProfileKey;

/// Everything gathered on the device for one registration attempt.
///
/// Consumed by value when the attempt is finalized.
#[derive(Debug, Clone)]
pub struct RegistrationData {
    pub e164: String,
    pub password: String,
    pub registration_id: u32,
    pub pni_registration_id: u32,
    pub profile_key: ProfileKey,
    pub pre_key_collections: PreKeyCollections,
    pub fcm_token: Option<String>,
    pub recovery_password: Option<String>,
}

impl RegistrationData {
    /// Whether the device registered with a push token.
    pub fn is_fcm(&self) -> bool {
        self.fcm_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// The service's confirmation of a verified account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfirmation {
    pub uuid: String,
    pub pni: String,
    #[serde(default)]
    pub storage_capable: bool,
}

/// Key material recovered from the PIN-protected backup, passed through to
/// registration-lock setup untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct RecoveryCredential {
    pub master_key: Vec<u8>,
    #[zeroize(skip)]
    pub tries_remaining: u32,
}

impl std::fmt::Debug for RecoveryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCredential")
            .field("tries_remaining", &self.tries_remaining)
            .finish_non_exhaustive()
    }
}

/// The verification result handed to finalize and echoed back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub confirmation: ServerConfirmation,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub recovery_credential: Option<RecoveryCredential>,
}
